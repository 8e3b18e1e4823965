//! Scenario executors.
//!
//! Each scenario runs on its own task: it waits for its start offset,
//! then drives VUs according to its executor kind until the traffic shape
//! ends and every VU is settled.

use std::time::Duration;

use rama::{graceful::ShutdownGuard, telemetry::tracing, utils::str::arcstr::ArcStr};
use tokio::time::Instant;

use crate::{
    clock::{Ticker, instant_after},
    config::{ExecutorConfig, ExecutorKind, ScenarioSpec},
    metrics::{MetricEvent, VuGauge},
    vu::{DrainingVus, VuContext, VuTally},
    workload::Workload,
};

mod arrival_rate;
mod curve;
mod ramping_vus;

pub use self::curve::{RateCurve, VuCurve};

/// Outcome of a single scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub name: ArcStr,
    pub executor: ExecutorKind,
    /// Offset (since run start) at which the scenario started.
    pub started_at: Duration,
    /// Offset (since run start) at which the last VU settled.
    pub ended_at: Duration,
    /// Iterations the schedule asked for.
    pub scheduled: u64,
    /// Iterations handed to a VU.
    pub dispatched: u64,
    /// Iterations which completed and were recorded as a sample.
    pub completed: u64,
    /// Iterations which could not be started in time for lack of VUs.
    pub dropped: u64,
    /// Iterations force terminated after their grace period.
    pub aborted: u64,
    /// Peak number of VUs alive at once, draining ones included.
    pub max_live_vus: u64,
    /// The run was stopped before this scenario ended on its own.
    pub interrupted: bool,
    /// The run was stopped before this scenario even started.
    pub skipped: bool,
}

impl ScenarioReport {
    fn new(spec: &ScenarioSpec) -> Self {
        Self {
            name: spec.name().clone(),
            executor: spec.kind(),
            started_at: Duration::ZERO,
            ended_at: Duration::ZERO,
            scheduled: 0,
            dispatched: 0,
            completed: 0,
            dropped: 0,
            aborted: 0,
            max_live_vus: 0,
            interrupted: false,
            skipped: false,
        }
    }

    fn settle(&mut self, tally: VuTally) {
        self.completed = tally.completed;
        self.aborted = tally.aborted;
    }
}

/// State shared by the control loops of one scenario.
pub(crate) struct ScenarioRuntime<W: Workload> {
    spec: ScenarioSpec,
    ctx: VuContext<W>,
    tick: Duration,
    hard_stop_grace: Duration,
    guard: ShutdownGuard,
    interrupted: bool,
    last_gauge: Option<(u64, u64)>,
}

impl<W: Workload> ScenarioRuntime<W> {
    pub(crate) fn new(
        spec: ScenarioSpec,
        ctx: VuContext<W>,
        tick: Duration,
        hard_stop_grace: Duration,
        guard: ShutdownGuard,
    ) -> Self {
        Self {
            spec,
            ctx,
            tick,
            hard_stop_grace,
            guard,
            interrupted: false,
            last_gauge: None,
        }
    }

    fn ticker(&self) -> Ticker {
        Ticker::new(self.tick)
    }

    fn name(&self) -> &ArcStr {
        &self.ctx.scenario
    }

    /// Record the VU population, skipping observations which did not change.
    fn record_vus(&mut self, active: u64, live: u64) {
        if self.last_gauge == Some((active, live)) {
            return;
        }
        self.last_gauge = Some((active, live));

        self.ctx.sink.record(MetricEvent::Vus(VuGauge {
            scenario: self.ctx.scenario.clone(),
            at: self.ctx.clock.elapsed(),
            active,
            live,
        }));
    }

    /// Deadline for VUs starting to drain now, given the regular grace period.
    fn drain_deadline(&self, grace: Duration) -> Instant {
        let grace = if self.interrupted {
            grace.min(self.hard_stop_grace)
        } else {
            grace
        };
        instant_after(Instant::now(), grace)
    }

    fn interrupt(&mut self, draining: &mut DrainingVus) {
        tracing::warn!(
            scenario = %self.name(),
            hard_stop_grace = ?self.hard_stop_grace,
            "scenario interrupted: stop scheduling and abort iterations after hard stop grace"
        );
        self.interrupted = true;
        draining.tighten(instant_after(Instant::now(), self.hard_stop_grace));
    }

    /// Wait until every draining VU exited, aborting those past their deadline.
    async fn settle(&mut self, draining: &mut DrainingVus, tally: &mut VuTally, ticker: &mut Ticker) {
        loop {
            let exited = draining.reap(Instant::now(), tally).await;
            if !exited.is_empty() {
                self.record_vus(0, draining.len() as u64);
            }
            if draining.is_empty() {
                return;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.guard.cancelled(), if !self.interrupted => {
                    self.interrupt(draining);
                }
            }
        }
    }
}

/// Run a scenario from its start offset until all of its VUs settled.
pub(crate) async fn run_scenario<W: Workload>(mut runtime: ScenarioRuntime<W>) -> ScenarioReport {
    let mut report = ScenarioReport::new(&runtime.spec);
    let start_at = runtime.ctx.clock.at(runtime.spec.start_time());

    tokio::select! {
        _ = tokio::time::sleep_until(start_at) => {}
        _ = runtime.guard.cancelled() => {
            tracing::info!(scenario = %runtime.name(), "run stopped before scenario start: skip");
            report.skipped = true;
            report.interrupted = true;
            return report;
        }
    }

    report.started_at = runtime.ctx.clock.elapsed();
    tracing::info!(
        scenario = %runtime.name(),
        executor = %runtime.spec.kind(),
        max_vus = runtime.spec.max_vus(),
        duration = ?runtime.spec.nominal_duration(),
        "scenario started"
    );

    match runtime.spec.executor().clone() {
        ExecutorConfig::ConstantArrivalRate(cfg) => {
            let curve = RateCurve::constant(cfg.rate, cfg.time_unit, cfg.duration);
            let pool = arrival_rate::PoolBounds {
                pre_allocated: cfg.pre_allocated_vus,
                max: cfg.max_vus,
            };
            arrival_rate::run(&mut runtime, curve, pool, &mut report).await;
        }
        ExecutorConfig::RampingArrivalRate(cfg) => {
            let curve =
                RateCurve::ramping(cfg.start_rate, cfg.time_unit, &cfg.stages, cfg.duration);
            let pool = arrival_rate::PoolBounds {
                pre_allocated: cfg.pre_allocated_vus,
                max: cfg.max_vus,
            };
            arrival_rate::run(&mut runtime, curve, pool, &mut report).await;
        }
        ExecutorConfig::RampingVus(cfg) => {
            let curve = VuCurve::new(cfg.start_vus, &cfg.stages);
            ramping_vus::run(&mut runtime, curve, cfg.graceful_ramp_down, &mut report).await;
        }
        ExecutorConfig::ConstantVus(cfg) => {
            let curve = VuCurve::constant(cfg.vus, cfg.duration);
            let grace = runtime.spec.graceful_stop();
            ramping_vus::run(&mut runtime, curve, grace, &mut report).await;
        }
    }

    report.ended_at = runtime.ctx.clock.elapsed();
    report.interrupted = runtime.interrupted;

    tracing::info!(
        scenario = %report.name,
        scheduled = report.scheduled,
        dispatched = report.dispatched,
        completed = report.completed,
        dropped = report.dropped,
        aborted = report.aborted,
        max_live_vus = report.max_live_vus,
        interrupted = report.interrupted,
        "scenario ended"
    );

    report
}
