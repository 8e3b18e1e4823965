use rama::telemetry::tracing;
use tokio::time::Instant;

use super::{RateCurve, ScenarioReport, ScenarioRuntime};
use crate::{
    clock::instant_after,
    metrics::{DroppedIteration, MetricEvent},
    vu::{DrainingVus, VuPool, VuTally},
    workload::Workload,
};

#[derive(Debug, Clone, Copy)]
pub(super) struct PoolBounds {
    pub(super) pre_allocated: u64,
    pub(super) max: u64,
}

/// Start iterations following the rate curve, independent of iteration latency.
///
/// Each tick dispatches every iteration which became due since the previous one.
/// An iteration for which no VU is available is recorded as dropped and
/// queued: it starts as soon as a VU frees up. The scheduler itself never waits for a VU.
pub(super) async fn run<W: Workload>(
    runtime: &mut ScenarioRuntime<W>,
    curve: RateCurve,
    bounds: PoolBounds,
    report: &mut ScenarioReport,
) {
    let start = Instant::now();
    let end = instant_after(start, curve.duration());

    let mut pool = VuPool::new(runtime.ctx.clone(), bounds.pre_allocated, bounds.max);
    let mut draining = DrainingVus::default();
    let mut backlog: u64 = 0;
    let mut ticker = runtime.ticker();

    tracing::debug!(
        scenario = %runtime.name(),
        total = curve.total_iterations(),
        pre_allocated = bounds.pre_allocated,
        max_vus = bounds.max,
        "arrival rate scheduler started"
    );

    loop {
        let now = Instant::now();

        let due = curve.due_iterations(now - start);
        while report.scheduled < due {
            report.scheduled += 1;
            if pool.try_dispatch() {
                report.dispatched += 1;
            } else {
                report.dropped += 1;
                backlog += 1;
                runtime.ctx.sink.record(MetricEvent::Dropped(DroppedIteration {
                    scenario: runtime.ctx.scenario.clone(),
                    at: runtime.ctx.clock.elapsed(),
                }));
            }
        }

        report.max_live_vus = report.max_live_vus.max(pool.live());
        runtime.record_vus(pool.busy(), pool.live());

        if now >= end || runtime.interrupted {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            Some(id) = pool.next_idle() => {
                pool.release(id);
                if backlog > 0 && pool.try_dispatch() {
                    backlog -= 1;
                    report.dispatched += 1;
                }
            }
            _ = runtime.guard.cancelled(), if !runtime.interrupted => {
                runtime.interrupt(&mut draining);
                break;
            }
        }
    }

    if backlog > 0 {
        tracing::debug!(scenario = %runtime.name(), backlog, "discard backlog at scenario end");
    }

    let deadline = runtime.drain_deadline(runtime.spec.graceful_stop());
    pool.drain_into(&mut draining, deadline);
    runtime.record_vus(0, draining.len() as u64);

    let mut tally = VuTally::default();
    runtime.settle(&mut draining, &mut tally, &mut ticker).await;
    report.settle(tally);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rama::{error::BoxError, graceful::Shutdown};
    use tokio::time;

    use super::super::test_utils::*;
    use crate::{
        metrics::names,
        threshold,
        workload::{IterationContext, IterationReport, workload_fn},
    };

    #[tokio::test(flavor = "current_thread")]
    async fn constant_rate_ten_per_second_for_ten_seconds() {
        time::pause();

        let spec = spec(serde_json::json!({
            "executor": "constant-arrival-rate",
            "rate": 10,
            "timeUnit": "1s",
            "duration": "10s",
            "preAllocatedVUs": 5,
            "maxVUs": 5,
        }));
        let workload = workload_fn(|_, ()| async {
            time::sleep(Duration::from_millis(50)).await;
            Ok(IterationReport::success())
        });

        let (report, samples) = run(spec, workload).await;

        assert_eq!(report.scheduled, 100);
        assert_eq!(report.dispatched, 100);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.completed, 100);
        assert_eq!(samples.samples().len(), 100);
        assert!(report.max_live_vus <= 5);
        assert!(!report.interrupted);

        // one iteration every 100ms
        for (i, sample) in samples.samples().iter().enumerate() {
            let expected = Duration::from_millis(100) * i as u32;
            assert!(
                sample.started_at >= expected && sample.started_at < expected + Duration::from_millis(10),
                "iteration {i} started at {:?}",
                sample.started_at
            );
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn exactly_five_failures_out_of_hundred() {
        time::pause();

        let spec = spec(serde_json::json!({
            "executor": "constant-arrival-rate",
            "rate": 10,
            "duration": "10s",
            "preAllocatedVUs": 1,
        }));
        // a single vu runs every iteration, so its counter is the global one
        let workload = workload_fn(|ctx: IterationContext, ()| async move {
            time::sleep(Duration::from_millis(10)).await;
            if ctx.iteration % 20 == 0 {
                return Err(BoxError::from("planned failure"));
            }
            Ok(IterationReport::success())
        });

        let (report, samples) = run(spec, workload).await;
        assert_eq!(report.completed, 100);
        assert_eq!(samples.failed(), 5);

        let rules = threshold::parse_rules([(names::ITERATION_FAILED, "rate<0.1")]).unwrap();
        let thresholds = threshold::evaluate(&rules, &samples);
        assert!(thresholds.passed());
        assert!((thresholds.outcomes()[0].observed.unwrap() - 0.05).abs() < 1e-9);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_iterations_are_dropped_not_awaited() {
        time::pause();

        let spec = spec(serde_json::json!({
            "executor": "constant-arrival-rate",
            "rate": 10,
            "duration": "2s",
            "preAllocatedVUs": 1,
            "maxVUs": 2,
        }));
        let workload = workload_fn(|_, ()| async {
            time::sleep(Duration::from_millis(500)).await;
            Ok(IterationReport::success())
        });

        let (report, samples) = run(spec, workload).await;

        assert_eq!(report.scheduled, 20);
        assert_eq!(report.max_live_vus, 2);
        assert!(report.dropped > 0);
        assert_eq!(samples.dropped().len() as u64, report.dropped);
        assert_eq!(report.dispatched, report.completed + report.aborted);
        assert_eq!(samples.samples().len() as u64, report.completed);
        // backlogged iterations start as soon as a vu frees up
        assert!(report.dispatched > 2 * 2);
        assert!(report.dispatched <= report.scheduled);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ramping_rate_follows_stages() {
        time::pause();

        let spec = spec(serde_json::json!({
            "executor": "ramping-arrival-rate",
            "startRate": 0,
            "preAllocatedVUs": 10,
            "stages": [
                { "target": 10, "duration": "2s" },
                { "target": 10, "duration": "2s" },
                { "target": 0, "duration": "2s" },
            ],
        }));
        let workload = workload_fn(|_, ()| async {
            time::sleep(Duration::from_millis(10)).await;
            Ok(IterationReport::success())
        });

        let (report, samples) = run(spec, workload).await;
        assert_eq!(report.scheduled, 10 + 20 + 10);
        assert_eq!(report.completed, 40);

        let in_flat_stage = samples
            .samples()
            .iter()
            .filter(|sample| {
                sample.started_at >= Duration::from_secs(2)
                    && sample.started_at < Duration::from_secs(4)
            })
            .count();
        assert!((19..=21).contains(&in_flat_stage), "{in_flat_stage}");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn hard_stop_aborts_in_flight_iterations() {
        time::pause();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = Shutdown::new(async move {
            let _ = stop_rx.await;
        });

        let spec = spec(serde_json::json!({
            "executor": "constant-arrival-rate",
            "rate": 2,
            "duration": "1m",
            "preAllocatedVUs": 50,
        }));
        let workload = workload_fn(|_, ()| async {
            time::sleep(Duration::from_secs(10)).await;
            Ok(IterationReport::success())
        });

        let task = tokio::spawn(run_with_guard(spec, workload, shutdown.guard()));
        time::sleep(Duration::from_secs(5)).await;
        stop_tx.send(()).unwrap();

        let (report, samples) = task.await.unwrap();
        assert!(report.interrupted);
        assert!(report.aborted > 0);
        assert_eq!(report.dispatched, report.completed + report.aborted);
        assert_eq!(samples.samples().len() as u64, report.completed);
        assert_eq!(samples.aborted().len() as u64, report.aborted);
        // hard stop grace of the test runtime is 1s
        assert!(report.ended_at < Duration::from_secs(7), "{:?}", report.ended_at);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn nothing_is_scheduled_once_stopped() {
        time::pause();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = Shutdown::new(async move {
            let _ = stop_rx.await;
        });

        let spec = spec(serde_json::json!({
            "executor": "constant-arrival-rate",
            "rate": 10,
            "duration": "1m",
            "preAllocatedVUs": 10,
        }));
        let workload = workload_fn(|_, ()| async {
            time::sleep(Duration::from_millis(10)).await;
            Ok(IterationReport::success())
        });

        let task = tokio::spawn(run_with_guard(spec, workload, shutdown.guard()));
        // the 52nd iteration becomes due right after the tick at 5.1s
        time::sleep(Duration::from_millis(5102)).await;
        stop_tx.send(()).unwrap();

        let (report, _) = task.await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.scheduled, 51);
        assert_eq!(report.dispatched, 51);
        assert_eq!(report.completed, 51);
        assert_eq!(report.dropped, 0);
    }
}
