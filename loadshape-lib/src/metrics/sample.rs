use std::time::Duration;

use rama::utils::str::arcstr::ArcStr;

use crate::vu::VuId;

/// Outcome of a single completed iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub scenario: ArcStr,
    pub vu: VuId,
    /// Per-VU iteration counter, starting at 0.
    pub iteration: u64,
    /// Start of the iteration, relative to the run start.
    pub started_at: Duration,
    pub duration: Duration,
    pub success: bool,
    /// Named sub-timings reported by the workload.
    pub timings: Vec<(ArcStr, Duration)>,
    /// Named boolean checks reported by the workload.
    pub checks: Vec<(ArcStr, bool)>,
}

/// An iteration the scheduler wanted to start but had no VU for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedIteration {
    pub scenario: ArcStr,
    pub at: Duration,
}

/// An iteration which got force terminated before it completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortedIteration {
    pub scenario: ArcStr,
    pub vu: VuId,
    pub iteration: u64,
    pub started_at: Duration,
    pub at: Duration,
}

/// Observation of the VU population of a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VuGauge {
    pub scenario: ArcStr,
    pub at: Duration,
    /// VUs which are not draining.
    pub active: u64,
    /// All VUs which still have a task, draining ones included.
    pub live: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    Iteration(Sample),
    Dropped(DroppedIteration),
    Aborted(AbortedIteration),
    Vus(VuGauge),
}

impl MetricEvent {
    pub fn scenario(&self) -> &ArcStr {
        match self {
            MetricEvent::Iteration(sample) => &sample.scenario,
            MetricEvent::Dropped(dropped) => &dropped.scenario,
            MetricEvent::Aborted(aborted) => &aborted.scenario,
            MetricEvent::Vus(gauge) => &gauge.scenario,
        }
    }
}
