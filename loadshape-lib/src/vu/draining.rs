use rama::telemetry::tracing;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};

use super::{VuContext, VuExit, VuId, VuSignal, VuState, dispatched_vu, looping_vu};
use crate::workload::Workload;

/// Controller side of a spawned VU task.
#[derive(Debug)]
pub(crate) struct VuHandle {
    id: VuId,
    state: VuState,
    signal: watch::Sender<VuSignal>,
    task: JoinHandle<VuExit>,
}

impl VuHandle {
    pub(crate) fn looping<W: Workload>(ctx: VuContext<W>, id: VuId) -> Self {
        let (signal, signal_rx) = watch::channel(VuSignal::Run);
        let task = tokio::spawn(looping_vu(ctx, id, signal_rx));
        Self {
            id,
            state: VuState::Running,
            signal,
            task,
        }
    }

    pub(crate) fn dispatched<W: Workload>(
        ctx: VuContext<W>,
        id: VuId,
        jobs: mpsc::Receiver<()>,
        idle_tx: mpsc::UnboundedSender<VuId>,
    ) -> Self {
        let (signal, signal_rx) = watch::channel(VuSignal::Run);
        let task = tokio::spawn(dispatched_vu(ctx, id, jobs, idle_tx, signal_rx));
        Self {
            id,
            state: VuState::Idle,
            signal,
            task,
        }
    }

    pub(crate) fn id(&self) -> VuId {
        self.id
    }

    pub(crate) fn state(&self) -> VuState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: VuState) {
        self.state = state;
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    fn drain(&mut self) {
        self.state = VuState::Draining;
        self.signal.send_replace(VuSignal::Drain);
    }

    fn resume(&mut self) {
        self.state = VuState::Running;
        self.signal.send_replace(VuSignal::Run);
    }

    fn abort(&self) {
        if *self.signal.borrow() != VuSignal::Abort {
            tracing::debug!(vu = %self.id, "graceful deadline passed: abort vu");
            self.signal.send_replace(VuSignal::Abort);
        }
    }
}

/// Results of the VU tasks joined so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct VuTally {
    pub(crate) completed: u64,
    pub(crate) aborted: u64,
}

impl VuTally {
    pub(crate) async fn join(&mut self, vu: VuHandle) {
        match vu.task.await {
            Ok(exit) => {
                self.completed += exit.iterations;
                self.aborted += u64::from(exit.aborted);
            }
            Err(err) => {
                tracing::warn!(vu = %vu.id, "vu task failed: {err}");
            }
        }
    }
}

/// VUs which are finishing their last iteration,
/// each with a deadline after which it gets aborted.
#[derive(Debug, Default)]
pub(crate) struct DrainingVus {
    vus: Vec<(VuHandle, Instant)>,
}

impl DrainingVus {
    /// Ask the VU to drain, aborting it if it is still running at `deadline`.
    pub(crate) fn push(&mut self, mut vu: VuHandle, deadline: Instant) {
        tracing::trace!(vu = %vu.id(), state = ?vu.state(), ?deadline, "drain vu");
        vu.drain();
        self.vus.push((vu, deadline));
    }

    pub(crate) fn len(&self) -> usize {
        self.vus.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.vus.is_empty()
    }

    /// Move every deadline forward to at most `deadline`.
    pub(crate) fn tighten(&mut self, deadline: Instant) {
        for (_, vu_deadline) in self.vus.iter_mut() {
            *vu_deadline = (*vu_deadline).min(deadline);
        }
    }

    /// Take back the lowest draining VU which is still running its last
    /// iteration and was not aborted yet, so it keeps looping.
    pub(crate) fn reclaim(&mut self) -> Option<VuHandle> {
        let index = self
            .vus
            .iter()
            .enumerate()
            .filter(|(_, (vu, _))| {
                *vu.signal.borrow() == VuSignal::Drain && !vu.task.is_finished()
            })
            .min_by_key(|(_, (vu, _))| vu.id)
            .map(|(index, _)| index)?;

        let (mut vu, _) = self.vus.swap_remove(index);
        tracing::trace!(vu = %vu.id, "reclaim draining vu");
        vu.resume();
        Some(vu)
    }

    /// Join the VUs which exited and abort those past their deadline.
    ///
    /// Returns the ids of the VUs which exited.
    pub(crate) async fn reap(&mut self, now: Instant, tally: &mut VuTally) -> Vec<VuId> {
        let mut exited = Vec::new();

        let mut index = 0;
        while index < self.vus.len() {
            if self.vus[index].0.task.is_finished() {
                let (vu, _) = self.vus.swap_remove(index);
                exited.push(vu.id);
                tally.join(vu).await;
                continue;
            }

            let (vu, deadline) = &self.vus[index];
            if *deadline <= now {
                vu.abort();
            }
            index += 1;
        }

        exited
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use rama::utils::str::arcstr::ArcStr;
    use tokio::time;

    use super::*;
    use crate::{
        clock::RunClock,
        metrics::MetricsCollector,
        workload::{IterationContext, IterationReport, workload_fn},
    };

    /// VUs from `slow_from` onwards run iterations far longer than any grace period.
    fn context(collector: &MetricsCollector, slow_from: u64) -> VuContext<impl Workload<Item = ()>> {
        VuContext {
            scenario: ArcStr::from("test"),
            workload: Arc::new(workload_fn(move |ctx: IterationContext, ()| async move {
                let delay = if ctx.vu.index() < slow_from { 100 } else { 10_000 };
                time::sleep(Duration::from_millis(delay)).await;
                Ok(IterationReport::success())
            })),
            selector: Arc::new(|_: VuId| ()),
            sink: collector.sink(),
            clock: RunClock::start(),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn drain_then_abort_after_deadline() {
        time::pause();

        let collector = MetricsCollector::spawn(RunClock::start(), None);
        let ctx = context(&collector, 1);

        let mut draining = DrainingVus::default();
        let deadline = Instant::now() + Duration::from_secs(1);
        for index in 0..2 {
            let vu = VuHandle::looping(ctx.clone(), VuId::new(index));
            assert_eq!(vu.state(), VuState::Running);
            draining.push(vu, deadline);
        }
        assert_eq!(draining.len(), 2);

        let mut tally = VuTally::default();
        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            draining.reap(Instant::now(), &mut tally).await,
            [VuId::new(0)]
        );
        assert_eq!(tally.completed, 1);

        time::sleep(Duration::from_secs(1)).await;
        assert!(draining.reap(Instant::now(), &mut tally).await.is_empty());

        // give the aborted vu the chance to exit
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            draining.reap(Instant::now(), &mut tally).await,
            [VuId::new(1)]
        );
        assert!(draining.is_empty());
        assert_eq!(
            tally,
            VuTally {
                completed: 1,
                aborted: 1
            }
        );

        let set = collector.finish().await.unwrap();
        assert_eq!(set.samples().len(), 1);
        assert_eq!(set.aborted().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn tighten_moves_deadlines_forward_only() {
        time::pause();

        let collector = MetricsCollector::spawn(RunClock::start(), None);
        let ctx = context(&collector, 0);

        let mut draining = DrainingVus::default();
        draining.push(
            VuHandle::looping(ctx, VuId::new(0)),
            Instant::now() + Duration::from_secs(30),
        );
        draining.tighten(Instant::now() + Duration::from_secs(1));
        draining.tighten(Instant::now() + Duration::from_secs(60));

        let mut tally = VuTally::default();
        time::sleep(Duration::from_secs(1)).await;
        assert!(draining.reap(Instant::now(), &mut tally).await.is_empty());
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            draining.reap(Instant::now(), &mut tally).await,
            [VuId::new(0)]
        );
        assert_eq!(tally.aborted, 1);

        drop(collector);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reclaimed_vu_keeps_looping() {
        time::pause();

        let collector = MetricsCollector::spawn(RunClock::start(), None);
        let ctx = context(&collector, 2);

        let mut draining = DrainingVus::default();
        let deadline = Instant::now() + Duration::from_secs(1);
        for index in [2, 1, 0] {
            draining.push(VuHandle::looping(ctx.clone(), VuId::new(index)), deadline);
        }

        time::sleep(Duration::from_millis(50)).await;
        let vu = draining.reclaim().unwrap();
        assert_eq!(vu.id(), VuId::new(0));
        assert_eq!(vu.state(), VuState::Running);
        assert_eq!(draining.len(), 2);

        // vu#1 completes its last iteration, the reclaimed vu#0 goes on
        let mut tally = VuTally::default();
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            draining.reap(Instant::now(), &mut tally).await,
            [VuId::new(1)]
        );
        time::sleep(Duration::from_millis(200)).await;
        assert!(!vu.is_finished());

        // aborted vus are not taken back
        time::sleep(Duration::from_secs(1)).await;
        assert!(draining.reap(Instant::now(), &mut tally).await.is_empty());
        assert!(draining.reclaim().is_none());

        drop(collector);
    }
}
