use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use rama::telemetry::tracing;
use tokio::time::Instant;

use super::{ScenarioReport, ScenarioRuntime, VuCurve};
use crate::{
    clock::instant_after,
    vu::{DrainingVus, VuHandle, VuId, VuTally},
    workload::Workload,
};

/// Reconcile the number of looping VUs with the target curve on every tick.
///
/// Surplus VUs are drained highest index first: each finishes its current
/// iteration, or gets aborted once `grace` passed. On a ramp up draining VUs
/// are taken back before new ones get spawned. Live VUs (draining ones
/// included) never exceed the largest target of the curve.
pub(super) async fn run<W: Workload>(
    runtime: &mut ScenarioRuntime<W>,
    curve: VuCurve,
    grace: Duration,
    report: &mut ScenarioReport,
) {
    let start = Instant::now();
    let end = instant_after(start, curve.duration());
    let max = curve.max_target();

    let mut active: BTreeMap<VuId, VuHandle> = BTreeMap::new();
    let mut draining = DrainingVus::default();
    let mut free: BTreeSet<u64> = BTreeSet::new();
    let mut next_index = 0;
    let mut tally = VuTally::default();
    let mut ticker = runtime.ticker();

    loop {
        let now = Instant::now();

        for id in draining.reap(now, &mut tally).await {
            free.insert(id.index());
        }
        // a reclaimed vu may already have seen its drain signal
        let exited: Vec<VuId> = active
            .values()
            .filter(|vu| vu.is_finished())
            .map(VuHandle::id)
            .collect();
        for id in exited {
            if let Some(vu) = active.remove(&id) {
                tally.join(vu).await;
                free.insert(id.index());
            }
        }

        if now >= end || runtime.interrupted {
            break;
        }

        let target = curve.target_at(now - start);

        while active.len() as u64 > target {
            let Some((id, vu)) = active.pop_last() else {
                break;
            };
            tracing::trace!(scenario = %runtime.name(), vu = %id, target, "ramp down: drain vu");
            draining.push(vu, instant_after(now, grace));
        }

        while (active.len() as u64) < target {
            if let Some(vu) = draining.reclaim() {
                tracing::trace!(scenario = %runtime.name(), vu = %vu.id(), target, "ramp up: reclaim vu");
                active.insert(vu.id(), vu);
                continue;
            }
            if (active.len() + draining.len()) as u64 >= max {
                break;
            }
            let index = free.pop_first().unwrap_or_else(|| {
                let index = next_index;
                next_index += 1;
                index
            });
            let id = VuId::new(index);
            tracing::trace!(scenario = %runtime.name(), vu = %id, target, "ramp up: spawn vu");
            active.insert(id, VuHandle::looping(runtime.ctx.clone(), id));
        }

        let live = (active.len() + draining.len()) as u64;
        report.max_live_vus = report.max_live_vus.max(live);
        runtime.record_vus(active.len() as u64, live);

        tokio::select! {
            _ = ticker.tick() => {}
            _ = runtime.guard.cancelled(), if !runtime.interrupted => {
                runtime.interrupt(&mut draining);
            }
        }
    }

    let deadline = runtime.drain_deadline(grace);
    for vu in std::mem::take(&mut active).into_values() {
        draining.push(vu, deadline);
    }
    runtime.record_vus(0, draining.len() as u64);

    runtime.settle(&mut draining, &mut tally, &mut ticker).await;

    report.settle(tally);
    report.dispatched = tally.completed + tally.aborted;
    report.scheduled = report.dispatched;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time;

    use super::super::test_utils::*;
    use crate::{
        metrics::{MetricData, SampleSet, names},
        workload::{IterationContext, IterationReport, Workload, workload_fn},
    };

    fn sleepy_workload(delay: Duration) -> impl Workload<Item = ()> {
        workload_fn(move |_: IterationContext, ()| async move {
            time::sleep(delay).await;
            Ok(IterationReport::success())
        })
    }

    /// Total active VUs as observed at `at`.
    fn active_at(samples: &SampleSet, at: Duration) -> u64 {
        samples
            .vu_gauges()
            .iter()
            .take_while(|gauge| gauge.at <= at)
            .last()
            .map(|gauge| gauge.active)
            .unwrap_or_default()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ramp_up_then_down() {
        time::pause();

        let spec = spec(serde_json::json!({
            "executor": "ramping-vus",
            "startVUs": 0,
            "stages": [
                { "target": 5, "duration": "10s" },
                { "target": 0, "duration": "5s" },
            ],
        }));
        let iteration = Duration::from_millis(500);
        let (report, samples) = run(spec, sleepy_workload(iteration)).await;

        assert_eq!(report.max_live_vus, 5);
        assert_eq!(active_at(&samples, Duration::from_secs(5)), 2);
        // the 5th vu joins once the line reaches 5, and leaves right after
        assert_eq!(active_at(&samples, Duration::from_millis(9995)), 4);
        assert_eq!(active_at(&samples, Duration::from_secs(10)), 5);
        assert_eq!(active_at(&samples, Duration::from_millis(10005)), 4);
        assert_eq!(report.aborted, 0);
        assert_eq!(report.completed, samples.samples().len() as u64);

        // every vu is gone at most one iteration after the last stage ended
        let last = samples.vu_gauges().last().unwrap();
        assert_eq!(last.live, 0);
        assert!(last.at <= Duration::from_secs(15) + iteration, "{:?}", last.at);
        assert!(report.ended_at <= Duration::from_secs(15) + iteration + Duration::from_millis(10));

        // highest indices are drained first, so vu#1 runs longest
        let last_of = |index: u64| {
            samples
                .samples()
                .iter()
                .filter(|sample| sample.vu.index() == index)
                .map(|sample| sample.started_at)
                .max()
                .unwrap()
        };
        assert!(last_of(0) > last_of(4));

        assert!(
            samples
                .vu_gauges()
                .iter()
                .all(|gauge| gauge.live <= 5)
        );
        let Some(MetricData::Gauge(vus)) = samples.metric(names::VUS) else {
            panic!("expected vus gauge");
        };
        assert_eq!(vus.iter().copied().fold(0., f64::max), 5.);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_iterations_are_aborted_after_graceful_ramp_down() {
        time::pause();

        let spec = spec(serde_json::json!({
            "executor": "ramping-vus",
            "startVUs": 2,
            "stages": [{ "target": 2, "duration": "1s" }],
            "gracefulRampDown": "2s",
        }));
        let (report, samples) = run(spec, sleepy_workload(Duration::from_secs(60))).await;

        assert_eq!(report.completed, 0);
        assert_eq!(report.aborted, 2);
        assert_eq!(report.dispatched, 2);
        assert_eq!(samples.aborted().len(), 2);
        assert!(report.ended_at < Duration::from_millis(3100), "{:?}", report.ended_at);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn constant_vus_keeps_exactly_n_active() {
        time::pause();

        let spec = spec(serde_json::json!({
            "executor": "constant-vus",
            "vus": 4,
            "duration": "3s",
        }));
        let (report, samples) = run(spec, sleepy_workload(Duration::from_millis(100))).await;

        assert_eq!(report.max_live_vus, 4);
        // 30 iterations per vu, plus possibly the one in flight at the end
        assert!(report.completed >= 4 * 30, "{}", report.completed);
        assert!(report.completed <= 4 * 31, "{}", report.completed);

        let running: Vec<_> = samples
            .vu_gauges()
            .iter()
            .filter(|gauge| gauge.at < Duration::from_secs(3))
            .map(|gauge| gauge.active)
            .collect();
        assert_eq!(running, [4]);

        let mut vus: Vec<_> = samples.samples().iter().map(|sample| sample.vu.index()).collect();
        vus.sort_unstable();
        vus.dedup();
        assert_eq!(vus, [0, 1, 2, 3]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn freed_indices_are_reused() {
        time::pause();

        let spec = spec(serde_json::json!({
            "executor": "ramping-vus",
            "startVUs": 3,
            "stages": [
                { "target": 3, "duration": "1s" },
                { "target": 1, "duration": "100ms" },
                { "target": 1, "duration": "2s" },
                { "target": 3, "duration": "100ms" },
                { "target": 3, "duration": "1s" },
            ],
        }));
        let (report, samples) = run(spec, sleepy_workload(Duration::from_millis(50))).await;

        assert_eq!(report.max_live_vus, 3);
        assert!(samples.samples().iter().all(|sample| sample.vu.index() < 3));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn draining_vus_are_reclaimed_on_ramp_up() {
        time::pause();

        let spec = spec(serde_json::json!({
            "executor": "ramping-vus",
            "startVUs": 3,
            "stages": [
                { "target": 3, "duration": "1s" },
                { "target": 1, "duration": "100ms" },
                { "target": 3, "duration": "100ms" },
                { "target": 3, "duration": "3s" },
            ],
        }));
        let (report, samples) = run(spec, sleepy_workload(Duration::from_secs(2))).await;

        // the two vus drained at ~1.1s are still busy, and are taken back
        assert_eq!(active_at(&samples, Duration::from_millis(1100)), 1);
        assert_eq!(active_at(&samples, Duration::from_millis(1200)), 3);
        assert!(
            samples
                .vu_gauges()
                .iter()
                .filter(|gauge| gauge.at >= Duration::from_millis(1200) && gauge.at < Duration::from_millis(4200))
                .all(|gauge| gauge.active == 3)
        );

        assert_eq!(report.max_live_vus, 3);
        assert_eq!(report.aborted, 0);
        assert!(samples.samples().iter().all(|sample| sample.vu.index() < 3));
        // each vu loops without a break: 0-2s, 2-4s, 4-6s
        assert_eq!(report.completed, 9);
    }
}
