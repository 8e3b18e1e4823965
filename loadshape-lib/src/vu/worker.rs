use std::sync::Arc;

use rama::{telemetry::tracing, utils::str::arcstr::ArcStr};
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};

use super::{VuId, VuSignal};
use crate::{
    clock::RunClock,
    metrics::{AbortedIteration, MetricEvent, MetricsSink, Sample},
    workload::{IterationContext, WorkItemSelector, Workload},
};

/// Everything a VU needs, shared by all VUs of a scenario.
pub(crate) struct VuContext<W: Workload> {
    pub(crate) scenario: ArcStr,
    pub(crate) workload: Arc<W>,
    pub(crate) selector: Arc<dyn WorkItemSelector<W::Item>>,
    pub(crate) sink: MetricsSink,
    pub(crate) clock: RunClock,
}

impl<W: Workload> Clone for VuContext<W> {
    fn clone(&self) -> Self {
        Self {
            scenario: self.scenario.clone(),
            workload: self.workload.clone(),
            selector: self.selector.clone(),
            sink: self.sink.clone(),
            clock: self.clock,
        }
    }
}

/// Returned by a VU task once it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct VuExit {
    /// Iterations which completed and got recorded as a sample.
    pub(crate) iterations: u64,
    /// Whether the VU exited because its in-flight iteration got aborted.
    pub(crate) aborted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterationEnd {
    Completed,
    Aborted,
}

/// VU which runs one iteration for every job it receives (arrival-rate executors).
///
/// After every iteration the VU announces itself as idle.
/// It exits when asked to drain (or abort) while idle or when the jobs channel closes.
pub(crate) async fn dispatched_vu<W: Workload>(
    ctx: VuContext<W>,
    id: VuId,
    mut jobs: mpsc::Receiver<()>,
    idle_tx: mpsc::UnboundedSender<VuId>,
    mut signal: watch::Receiver<VuSignal>,
) -> VuExit {
    let item = ctx.selector.select(id);
    let mut exit = VuExit::default();

    loop {
        // a job accepted before the drain signal is still executed
        let job = tokio::select! {
            biased;
            job = jobs.recv() => job,
            _ = signal.wait_for(|signal| *signal != VuSignal::Run) => None,
        };
        if job.is_none() {
            tracing::trace!(scenario = %ctx.scenario, vu = %id, "dispatched vu: exit");
            return exit;
        }

        match run_iteration(&ctx, id, exit.iterations, item.clone(), &mut signal).await {
            IterationEnd::Completed => exit.iterations += 1,
            IterationEnd::Aborted => {
                exit.aborted = true;
                return exit;
            }
        }

        if idle_tx.send(id).is_err() {
            tracing::trace!(scenario = %ctx.scenario, vu = %id, "dispatched vu: pool gone");
            return exit;
        }
    }
}

/// VU which runs iterations back to back until it is asked to drain (VU executors).
pub(crate) async fn looping_vu<W: Workload>(
    ctx: VuContext<W>,
    id: VuId,
    mut signal: watch::Receiver<VuSignal>,
) -> VuExit {
    let item = ctx.selector.select(id);
    let mut exit = VuExit::default();

    while *signal.borrow_and_update() == VuSignal::Run {
        match run_iteration(&ctx, id, exit.iterations, item.clone(), &mut signal).await {
            IterationEnd::Completed => exit.iterations += 1,
            IterationEnd::Aborted => {
                exit.aborted = true;
                break;
            }
        }
    }

    tracing::trace!(
        scenario = %ctx.scenario,
        vu = %id,
        iterations = exit.iterations,
        "looping vu: exit"
    );
    exit
}

/// Run a single iteration on its own task, so a panic stays contained
/// and the iteration can be aborted without tearing down the VU.
async fn run_iteration<W: Workload>(
    ctx: &VuContext<W>,
    vu: VuId,
    iteration: u64,
    item: W::Item,
    signal: &mut watch::Receiver<VuSignal>,
) -> IterationEnd {
    let start = Instant::now();
    let started_at = ctx.clock.offset_of(start);

    let workload = ctx.workload.clone();
    let iteration_ctx = IterationContext {
        scenario: ctx.scenario.clone(),
        vu,
        iteration,
    };
    let mut task = tokio::spawn(async move { workload.iteration(iteration_ctx, item).await });

    let result = tokio::select! {
        result = &mut task => result,
        _ = wait_for_abort(signal) => {
            task.abort();
            tracing::debug!(scenario = %ctx.scenario, %vu, iteration, "iteration aborted");
            ctx.sink.record(MetricEvent::Aborted(AbortedIteration {
                scenario: ctx.scenario.clone(),
                vu,
                iteration,
                started_at,
                at: ctx.clock.elapsed(),
            }));
            return IterationEnd::Aborted;
        }
    };
    let duration = start.elapsed();

    let (success, timings, checks) = match result {
        Ok(Ok(report)) => report.into_parts(),
        Ok(Err(err)) => {
            tracing::debug!(scenario = %ctx.scenario, %vu, iteration, "iteration failed: {err}");
            (false, Vec::new(), Vec::new())
        }
        Err(err) => {
            tracing::warn!(scenario = %ctx.scenario, %vu, iteration, "iteration panicked: {err}");
            (false, Vec::new(), Vec::new())
        }
    };

    ctx.sink.record(MetricEvent::Iteration(Sample {
        scenario: ctx.scenario.clone(),
        vu,
        iteration,
        started_at,
        duration,
        success,
        timings,
        checks,
    }));

    IterationEnd::Completed
}

async fn wait_for_abort(signal: &mut watch::Receiver<VuSignal>) {
    if signal
        .wait_for(|signal| *signal == VuSignal::Abort)
        .await
        .is_err()
    {
        // controller went away: let the iteration run to completion
        std::future::pending::<()>().await;
    }
}
