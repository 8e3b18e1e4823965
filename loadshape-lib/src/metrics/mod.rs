//! Metric events, their collection and aggregation.
//!
//! Producers (VUs and controllers) record [`MetricEvent`]s through a cloneable
//! [`MetricsSink`]. A single collector task owns the store, optionally
//! forwarding every event to a [`Reporter`] for live progress output.

use std::time::Duration;

mod collector;
mod sample;
mod summary;

pub use self::{
    collector::{CollectorHandle, MetricsCollector, MetricsSink},
    sample::{AbortedIteration, DroppedIteration, MetricEvent, Sample, VuGauge},
    summary::{MetricData, SampleSet, Trend},
};

/// Names of the built-in metrics.
pub mod names {
    /// Trend (ms) of complete iteration durations.
    pub const ITERATION_DURATION: &str = "iteration_duration";
    /// Counter of completed iterations.
    pub const ITERATIONS: &str = "iterations";
    /// Rate of failed iterations.
    pub const ITERATION_FAILED: &str = "iteration_failed";
    /// Rate of all passed workload checks.
    pub const CHECKS: &str = "checks";
    /// Counter of iterations which could not be started due to lack of VUs.
    pub const DROPPED_ITERATIONS: &str = "dropped_iterations";
    /// Counter of force terminated iterations.
    pub const ABORTED_ITERATIONS: &str = "aborted_iterations";
    /// Gauge of active VUs, summed over all scenarios.
    pub const VUS: &str = "vus";
}

/// Live progress output, driven by the collector task.
pub trait Reporter: Send + Sync + 'static {
    fn on_event(&mut self, ev: &MetricEvent);
    /// Called every reporter interval, with the elapsed time since run start.
    fn on_tick(&mut self, now: Duration);
    fn finish(&mut self);
}

pub struct ReporterConfig {
    pub reporter: Box<dyn Reporter>,
    pub interval: Duration,
}

impl ReporterConfig {
    pub fn new(reporter: Box<dyn Reporter>, interval: Duration) -> Self {
        Self { reporter, interval }
    }
}

impl std::fmt::Debug for ReporterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReporterConfig")
            .field("interval", &self.interval)
            .finish()
    }
}
