use std::time::Duration;

use rama::error::BoxError;
use serde::Deserialize;

/// A linear ramp segment: move toward `target` over `duration`.
///
/// For arrival-rate executors the target is an iteration rate
/// (per time unit), for VU executors a number of VUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub target: u64,
    pub duration: Duration,
}

impl Stage {
    pub fn new(target: u64, duration: Duration) -> Self {
        Self { target, duration }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStage {
    pub target: u64,
    #[serde(deserialize_with = "super::duration::deserialize")]
    pub duration: Duration,
}

impl From<RawStage> for Stage {
    fn from(value: RawStage) -> Self {
        Self::new(value.target, value.duration)
    }
}

pub(super) fn validate_stages(stages: &[Stage]) -> Result<(), BoxError> {
    if stages.is_empty() {
        return Err(BoxError::from("at least one stage is required"));
    }

    for (index, stage) in stages.iter().enumerate() {
        if stage.duration.is_zero() {
            return Err(BoxError::from(format!(
                "stage #{index} (target = {}) has a zero duration",
                stage.target
            )));
        }
    }

    Ok(())
}

pub(crate) fn total_duration(stages: &[Stage]) -> Duration {
    stages.iter().map(|stage| stage.duration).sum()
}
