use std::{fmt, time::Duration};

use rama::{
    error::{BoxError, ErrorContext as _},
    utils::str::arcstr::ArcStr,
};
use serde::Deserialize;

use super::stage::{self, RawStage, Stage};

const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);
const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
const DEFAULT_GRACEFUL_RAMP_DOWN: Duration = Duration::from_secs(30);
const MAX_SCENARIO_NAME_LEN: usize = 64;

/// The traffic shape a scenario is driven by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    ConstantArrivalRate,
    RampingArrivalRate,
    RampingVus,
    ConstantVus,
}

impl ExecutorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorKind::ConstantArrivalRate => "constant-arrival-rate",
            ExecutorKind::RampingArrivalRate => "ramping-arrival-rate",
            ExecutorKind::RampingVus => "ramping-vus",
            ExecutorKind::ConstantVus => "constant-vus",
        }
    }

    /// Arrival-rate executors start iterations at a rate,
    /// independent of how many are still in flight.
    pub fn is_arrival_rate(self) -> bool {
        matches!(
            self,
            ExecutorKind::ConstantArrivalRate | ExecutorKind::RampingArrivalRate
        )
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantArrivalRate {
    /// Iterations started per `time_unit`.
    pub rate: u64,
    pub time_unit: Duration,
    pub duration: Duration,
    pub pre_allocated_vus: u64,
    pub max_vus: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampingArrivalRate {
    /// Iterations started per `time_unit` at the scenario start.
    pub start_rate: u64,
    pub time_unit: Duration,
    pub stages: Vec<Stage>,
    /// When set the final stage target is held until this duration elapsed,
    /// or the stages are cut short if they last longer.
    pub duration: Option<Duration>,
    pub pre_allocated_vus: u64,
    pub max_vus: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampingVus {
    pub start_vus: u64,
    pub stages: Vec<Stage>,
    /// How long a draining VU may keep running its
    /// current iteration before it gets aborted.
    pub graceful_ramp_down: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantVus {
    pub vus: u64,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorConfig {
    ConstantArrivalRate(ConstantArrivalRate),
    RampingArrivalRate(RampingArrivalRate),
    RampingVus(RampingVus),
    ConstantVus(ConstantVus),
}

impl ExecutorConfig {
    pub fn kind(&self) -> ExecutorKind {
        match self {
            ExecutorConfig::ConstantArrivalRate(_) => ExecutorKind::ConstantArrivalRate,
            ExecutorConfig::RampingArrivalRate(_) => ExecutorKind::RampingArrivalRate,
            ExecutorConfig::RampingVus(_) => ExecutorKind::RampingVus,
            ExecutorConfig::ConstantVus(_) => ExecutorKind::ConstantVus,
        }
    }
}

/// Validated, immutable description of one named scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSpec {
    name: ArcStr,
    executor: ExecutorConfig,
    start_time: Duration,
    graceful_stop: Duration,
}

impl ScenarioSpec {
    /// Validate a raw scenario into its immutable form.
    pub fn try_from_raw(name: &str, raw: RawScenario) -> Result<Self, BoxError> {
        validate_scenario_name(name)?;

        let kind = raw.executor;
        let executor = match kind {
            ExecutorKind::ConstantArrivalRate => {
                raw.reject_unsupported(&[
                    ("startRate", raw.start_rate.is_some()),
                    ("startVUs", raw.start_vus.is_some()),
                    ("vus", raw.vus.is_some()),
                    ("stages", raw.stages.is_some()),
                    ("gracefulRampDown", raw.graceful_ramp_down.is_some()),
                ])?;

                let rate = positive("rate", raw.rate)?;
                let time_unit = positive_duration("timeUnit", raw.time_unit, DEFAULT_TIME_UNIT)?;
                let duration = required_duration("duration", raw.duration)?;
                let (pre_allocated_vus, max_vus) =
                    vu_bounds(raw.pre_allocated_vus, raw.max_vus)?;

                ExecutorConfig::ConstantArrivalRate(ConstantArrivalRate {
                    rate,
                    time_unit,
                    duration,
                    pre_allocated_vus,
                    max_vus,
                })
            }
            ExecutorKind::RampingArrivalRate => {
                raw.reject_unsupported(&[
                    ("rate", raw.rate.is_some()),
                    ("startVUs", raw.start_vus.is_some()),
                    ("vus", raw.vus.is_some()),
                    ("gracefulRampDown", raw.graceful_ramp_down.is_some()),
                ])?;

                let time_unit = positive_duration("timeUnit", raw.time_unit, DEFAULT_TIME_UNIT)?;
                let stages = stages(raw.stages)?;
                let duration = match raw.duration {
                    Some(duration) if duration.is_zero() => {
                        return Err(BoxError::from("'duration' must be greater than zero"));
                    }
                    duration => duration,
                };
                let (pre_allocated_vus, max_vus) =
                    vu_bounds(raw.pre_allocated_vus, raw.max_vus)?;

                ExecutorConfig::RampingArrivalRate(RampingArrivalRate {
                    start_rate: raw.start_rate.unwrap_or_default(),
                    time_unit,
                    stages,
                    duration,
                    pre_allocated_vus,
                    max_vus,
                })
            }
            ExecutorKind::RampingVus => {
                raw.reject_unsupported(&[
                    ("rate", raw.rate.is_some()),
                    ("startRate", raw.start_rate.is_some()),
                    ("timeUnit", raw.time_unit.is_some()),
                    ("preAllocatedVUs", raw.pre_allocated_vus.is_some()),
                    ("maxVUs", raw.max_vus.is_some()),
                    ("vus", raw.vus.is_some()),
                    ("duration", raw.duration.is_some()),
                ])?;

                ExecutorConfig::RampingVus(RampingVus {
                    start_vus: raw.start_vus.unwrap_or(1),
                    stages: stages(raw.stages)?,
                    graceful_ramp_down: raw
                        .graceful_ramp_down
                        .unwrap_or(DEFAULT_GRACEFUL_RAMP_DOWN),
                })
            }
            ExecutorKind::ConstantVus => {
                raw.reject_unsupported(&[
                    ("rate", raw.rate.is_some()),
                    ("startRate", raw.start_rate.is_some()),
                    ("timeUnit", raw.time_unit.is_some()),
                    ("preAllocatedVUs", raw.pre_allocated_vus.is_some()),
                    ("maxVUs", raw.max_vus.is_some()),
                    ("startVUs", raw.start_vus.is_some()),
                    ("stages", raw.stages.is_some()),
                    ("gracefulRampDown", raw.graceful_ramp_down.is_some()),
                ])?;

                ExecutorConfig::ConstantVus(ConstantVus {
                    vus: positive("vus", Some(raw.vus.unwrap_or(1)))?,
                    duration: required_duration("duration", raw.duration)?,
                })
            }
        };

        Ok(Self {
            name: ArcStr::from(name),
            executor,
            start_time: raw.start_time.unwrap_or_default(),
            graceful_stop: raw.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
        })
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    pub fn executor(&self) -> &ExecutorConfig {
        &self.executor
    }

    pub fn kind(&self) -> ExecutorKind {
        self.executor.kind()
    }

    /// Offset relative to the run start before this scenario begins.
    pub fn start_time(&self) -> Duration {
        self.start_time
    }

    /// Time in-flight iterations get to finish once the scenario's nominal
    /// duration elapsed, for executors that have no `gracefulRampDown`.
    pub fn graceful_stop(&self) -> Duration {
        self.graceful_stop
    }

    /// Upper bound on the number of VUs this scenario will ever run concurrently.
    pub fn max_vus(&self) -> u64 {
        match &self.executor {
            ExecutorConfig::ConstantArrivalRate(cfg) => cfg.max_vus,
            ExecutorConfig::RampingArrivalRate(cfg) => cfg.max_vus,
            ExecutorConfig::RampingVus(cfg) => cfg
                .stages
                .iter()
                .map(|stage| stage.target)
                .fold(cfg.start_vus, u64::max),
            ExecutorConfig::ConstantVus(cfg) => cfg.vus,
        }
    }

    /// Duration of the traffic shape, excluding start offset and grace periods.
    pub fn nominal_duration(&self) -> Duration {
        match &self.executor {
            ExecutorConfig::ConstantArrivalRate(cfg) => cfg.duration,
            ExecutorConfig::RampingArrivalRate(cfg) => cfg
                .duration
                .unwrap_or_else(|| stage::total_duration(&cfg.stages)),
            ExecutorConfig::RampingVus(cfg) => stage::total_duration(&cfg.stages),
            ExecutorConfig::ConstantVus(cfg) => cfg.duration,
        }
    }
}

/// Scenario as found in the configuration file.
///
/// Keys follow the usual camelCase load testing vocabulary.
/// Which keys are accepted depends on the executor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawScenario {
    pub executor: ExecutorKind,
    #[serde(default)]
    pub rate: Option<u64>,
    #[serde(default)]
    pub start_rate: Option<u64>,
    #[serde(default, deserialize_with = "super::duration::deserialize_opt")]
    pub time_unit: Option<Duration>,
    #[serde(default, rename = "preAllocatedVUs")]
    pub pre_allocated_vus: Option<u64>,
    #[serde(default, rename = "maxVUs")]
    pub max_vus: Option<u64>,
    #[serde(default, rename = "startVUs")]
    pub start_vus: Option<u64>,
    #[serde(default)]
    pub vus: Option<u64>,
    #[serde(default)]
    pub stages: Option<Vec<RawStage>>,
    #[serde(default, deserialize_with = "super::duration::deserialize_opt")]
    pub duration: Option<Duration>,
    #[serde(default, deserialize_with = "super::duration::deserialize_opt")]
    pub graceful_ramp_down: Option<Duration>,
    #[serde(default, deserialize_with = "super::duration::deserialize_opt")]
    pub graceful_stop: Option<Duration>,
    #[serde(default, deserialize_with = "super::duration::deserialize_opt")]
    pub start_time: Option<Duration>,
}

impl RawScenario {
    fn reject_unsupported(&self, options: &[(&str, bool)]) -> Result<(), BoxError> {
        match options.iter().find(|(_, present)| *present) {
            Some((option, _)) => Err(BoxError::from(format!(
                "option '{option}' is not supported by executor '{}'",
                self.executor
            ))),
            None => Ok(()),
        }
    }
}

/// Scenario names end up in logs and metric tags,
/// so they are restricted to a conservative charset.
fn validate_scenario_name(name: &str) -> Result<(), BoxError> {
    if name.is_empty() {
        return Err(BoxError::from("scenario name cannot be empty"));
    }
    if name.len() > MAX_SCENARIO_NAME_LEN {
        return Err(BoxError::from(format!(
            "scenario name '{name}' is too long (max {MAX_SCENARIO_NAME_LEN} characters)"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !c.is_alphanumeric() && !matches!(c, '_' | '-' | '.'))
    {
        return Err(BoxError::from(format!(
            "scenario name '{name}' contains invalid character '{c}'"
        )));
    }
    Ok(())
}

fn positive(option: &str, value: Option<u64>) -> Result<u64, BoxError> {
    match value {
        None => Err(BoxError::from(format!("option '{option}' is required"))),
        Some(0) => Err(BoxError::from(format!(
            "option '{option}' must be greater than zero"
        ))),
        Some(value) => Ok(value),
    }
}

fn required_duration(option: &str, value: Option<Duration>) -> Result<Duration, BoxError> {
    let duration =
        value.ok_or_else(|| BoxError::from(format!("option '{option}' is required")))?;
    positive_duration(option, Some(duration), duration)
}

fn positive_duration(
    option: &str,
    value: Option<Duration>,
    default: Duration,
) -> Result<Duration, BoxError> {
    let duration = value.unwrap_or(default);
    if duration.is_zero() {
        return Err(BoxError::from(format!(
            "option '{option}' must be greater than zero"
        )));
    }
    Ok(duration)
}

fn stages(raw: Option<Vec<RawStage>>) -> Result<Vec<Stage>, BoxError> {
    let stages: Vec<Stage> = raw
        .ok_or_else(|| BoxError::from("option 'stages' is required"))?
        .into_iter()
        .map(Into::into)
        .collect();
    stage::validate_stages(&stages).context("validate stages")?;
    Ok(stages)
}

fn vu_bounds(pre_allocated: Option<u64>, max: Option<u64>) -> Result<(u64, u64), BoxError> {
    let pre_allocated =
        pre_allocated.ok_or_else(|| BoxError::from("option 'preAllocatedVUs' is required"))?;
    let max = max.unwrap_or(pre_allocated);

    if max == 0 {
        return Err(BoxError::from("option 'maxVUs' must be greater than zero"));
    }
    if max < pre_allocated {
        return Err(BoxError::from(format!(
            "option 'maxVUs' ({max}) must be greater than or equal to 'preAllocatedVUs' ({pre_allocated})"
        )));
    }

    Ok((pre_allocated, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, value: serde_json::Value) -> Result<ScenarioSpec, BoxError> {
        let raw: RawScenario = serde_json::from_value(value)?;
        ScenarioSpec::try_from_raw(name, raw)
    }

    #[test]
    fn constant_arrival_rate_with_defaults() {
        let spec = spec(
            "constant_requests",
            serde_json::json!({
                "executor": "constant-arrival-rate",
                "rate": 10,
                "duration": "10s",
                "preAllocatedVUs": 25,
            }),
        )
        .unwrap();

        assert_eq!(spec.kind(), ExecutorKind::ConstantArrivalRate);
        assert_eq!(spec.start_time(), Duration::ZERO);
        assert_eq!(spec.graceful_stop(), DEFAULT_GRACEFUL_STOP);
        assert_eq!(spec.max_vus(), 25);
        assert_eq!(
            spec.executor(),
            &ExecutorConfig::ConstantArrivalRate(ConstantArrivalRate {
                rate: 10,
                time_unit: Duration::from_secs(1),
                duration: Duration::from_secs(10),
                pre_allocated_vus: 25,
                max_vus: 25,
            })
        );
    }

    #[test]
    fn ramping_arrival_rate() {
        let spec = spec(
            "ramping_requests",
            serde_json::json!({
                "executor": "ramping-arrival-rate",
                "startRate": 20,
                "timeUnit": "1s",
                "preAllocatedVUs": 50,
                "maxVUs": 50,
                "stages": [
                    { "target": 40, "duration": "2s" },
                    { "target": 80, "duration": "4s" },
                    { "target": 100, "duration": "8s" },
                    { "target": 50, "duration": "10s" },
                ],
            }),
        )
        .unwrap();

        assert_eq!(spec.nominal_duration(), Duration::from_secs(24));
        let ExecutorConfig::RampingArrivalRate(cfg) = spec.executor() else {
            panic!("unexpected executor: {:?}", spec.executor());
        };
        assert_eq!(cfg.start_rate, 20);
        assert_eq!(cfg.stages.len(), 4);
        assert_eq!(cfg.duration, None);
    }

    #[test]
    fn ramping_vus_max_is_largest_target() {
        let spec = spec(
            "ramping_phase",
            serde_json::json!({
                "executor": "ramping-vus",
                "startVUs": 0,
                "stages": [
                    { "duration": "5s", "target": 10 },
                    { "duration": "20s", "target": 50 },
                    { "duration": "30s", "target": 0 },
                ],
                "gracefulRampDown": "30s",
            }),
        )
        .unwrap();

        assert_eq!(spec.max_vus(), 50);
        assert_eq!(spec.nominal_duration(), Duration::from_secs(55));
    }

    #[test]
    fn constant_vus_with_start_time() {
        let spec = spec(
            "constant_phase",
            serde_json::json!({
                "executor": "constant-vus",
                "vus": 50,
                "duration": "15s",
                "startTime": "20s",
            }),
        )
        .unwrap();

        assert_eq!(spec.start_time(), Duration::from_secs(20));
        assert_eq!(spec.max_vus(), 50);
    }

    #[test]
    fn max_vus_below_pre_allocated_is_rejected() {
        let err = spec(
            "s",
            serde_json::json!({
                "executor": "constant-arrival-rate",
                "rate": 10,
                "duration": "10s",
                "preAllocatedVUs": 25,
                "maxVUs": 5,
            }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("maxVUs"), "{err}");
    }

    #[test]
    fn zero_stage_duration_is_rejected() {
        assert!(
            spec(
                "s",
                serde_json::json!({
                    "executor": "ramping-vus",
                    "stages": [{ "target": 5, "duration": "0s" }],
                }),
            )
            .is_err()
        );
    }

    #[test]
    fn missing_stages_are_rejected() {
        assert!(
            spec(
                "s",
                serde_json::json!({
                    "executor": "ramping-arrival-rate",
                    "preAllocatedVUs": 1,
                }),
            )
            .is_err()
        );
    }

    #[test]
    fn executor_incompatible_option_is_rejected() {
        let err = spec(
            "s",
            serde_json::json!({
                "executor": "constant-vus",
                "vus": 2,
                "duration": "1s",
                "rate": 10,
            }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("'rate'"), "{err}");
    }

    #[test]
    fn unknown_option_or_executor_fails_to_decode() {
        assert!(
            serde_json::from_value::<RawScenario>(serde_json::json!({
                "executor": "per-vu-iterations",
            }))
            .is_err()
        );
        assert!(
            serde_json::from_value::<RawScenario>(serde_json::json!({
                "executor": "constant-vus",
                "iterations": 3,
            }))
            .is_err()
        );
    }

    #[test]
    fn scenario_names_are_validated() {
        let raw = || RawScenario {
            executor: ExecutorKind::ConstantVus,
            rate: None,
            start_rate: None,
            time_unit: None,
            pre_allocated_vus: None,
            max_vus: None,
            start_vus: None,
            vus: Some(1),
            stages: None,
            duration: Some(Duration::from_secs(1)),
            graceful_ramp_down: None,
            graceful_stop: None,
            start_time: None,
        };

        assert!(ScenarioSpec::try_from_raw("ok.name-1_a", raw()).is_ok());
        assert!(ScenarioSpec::try_from_raw("", raw()).is_err());
        assert!(ScenarioSpec::try_from_raw("with space", raw()).is_err());
        assert!(ScenarioSpec::try_from_raw(&"x".repeat(65), raw()).is_err());
    }
}
