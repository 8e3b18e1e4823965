use std::collections::VecDeque;

use rama::telemetry::tracing;
use tokio::{sync::mpsc, time::Instant};

use super::{DrainingVus, VuContext, VuHandle, VuId, VuState};
use crate::workload::Workload;

struct PoolSlot {
    vu: VuHandle,
    jobs: mpsc::Sender<()>,
}

/// Bounded pool of reusable VUs for the arrival-rate executors.
///
/// The pool starts with the pre-allocated VUs and grows lazily,
/// one VU at a time, up to its maximum. It never shrinks while running.
pub(crate) struct VuPool<W: Workload> {
    ctx: VuContext<W>,
    max: u64,
    slots: Vec<PoolSlot>,
    idle: VecDeque<VuId>,
    idle_tx: mpsc::UnboundedSender<VuId>,
    idle_rx: mpsc::UnboundedReceiver<VuId>,
}

impl<W: Workload> VuPool<W> {
    pub(crate) fn new(ctx: VuContext<W>, pre_allocated: u64, max: u64) -> Self {
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let mut pool = Self {
            ctx,
            max,
            slots: Vec::new(),
            idle: VecDeque::new(),
            idle_tx,
            idle_rx,
        };

        for _ in 0..pre_allocated.min(max) {
            pool.grow();
        }

        pool
    }

    fn grow(&mut self) -> bool {
        if self.live() >= self.max {
            return false;
        }

        let id = VuId::new(self.slots.len() as u64);
        let (jobs_tx, jobs_rx) = mpsc::channel(1);
        let vu = VuHandle::dispatched(self.ctx.clone(), id, jobs_rx, self.idle_tx.clone());
        self.slots.push(PoolSlot { vu, jobs: jobs_tx });
        self.idle.push_back(id);

        tracing::trace!(scenario = %self.ctx.scenario, vu = %id, live = self.slots.len(), "vu pool: grow");
        true
    }

    /// VUs that were spawned, busy or not.
    pub(crate) fn live(&self) -> u64 {
        self.slots.len() as u64
    }

    pub(crate) fn busy(&self) -> u64 {
        self.live() - self.idle.len() as u64
    }

    /// Hand one iteration to an idle VU, growing the pool if needed.
    ///
    /// Never waits: returns `false` if no VU can take the iteration.
    pub(crate) fn try_dispatch(&mut self) -> bool {
        loop {
            let Some(id) = self.idle.pop_front() else {
                if self.grow() {
                    continue;
                }
                return false;
            };

            let slot = &mut self.slots[id.index() as usize];
            match slot.jobs.try_send(()) {
                Ok(()) => {
                    slot.vu.set_state(VuState::Running);
                    return true;
                }
                Err(err) => {
                    // not expected for an idle vu, take it out of rotation
                    tracing::debug!(scenario = %self.ctx.scenario, vu = %id, "vu pool: vu rejected job: {err}");
                }
            }
        }
    }

    /// Wait for a busy VU to finish its iteration. Cancel safe.
    pub(crate) async fn next_idle(&mut self) -> Option<VuId> {
        self.idle_rx.recv().await
    }

    pub(crate) fn release(&mut self, id: VuId) {
        if let Some(slot) = self.slots.get_mut(id.index() as usize) {
            slot.vu.set_state(VuState::Idle);
            self.idle.push_back(id);
        }
    }

    /// Stop the pool: every VU finishes the iteration it accepted and exits.
    pub(crate) fn drain_into(self, draining: &mut DrainingVus, deadline: Instant) {
        for PoolSlot { vu, jobs } in self.slots {
            drop(jobs);
            draining.push(vu, deadline);
        }
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
        vu::VuTally,
        workload::{IterationReport, workload_fn},
    };

    fn pool(collector: &MetricsCollector, pre_allocated: u64, max: u64) -> VuPool<impl Workload<Item = ()>> {
        let ctx = VuContext {
            scenario: ArcStr::from("test"),
            workload: Arc::new(workload_fn(|_, ()| async {
                time::sleep(Duration::from_secs(1)).await;
                Ok(IterationReport::success())
            })),
            selector: Arc::new(|_: VuId| ()),
            sink: collector.sink(),
            clock: RunClock::start(),
        };
        VuPool::new(ctx, pre_allocated, max)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn grows_lazily_up_to_max() {
        time::pause();

        let collector = MetricsCollector::spawn(RunClock::start(), None);
        let mut pool = pool(&collector, 2, 3);
        assert_eq!(pool.live(), 2);
        assert_eq!(pool.busy(), 0);

        assert!(pool.try_dispatch());
        assert!(pool.try_dispatch());
        assert_eq!(pool.live(), 2);
        assert!(pool.try_dispatch());
        assert_eq!(pool.live(), 3);
        assert!(!pool.try_dispatch());
        assert_eq!(pool.busy(), 3);

        let id = pool.next_idle().await.unwrap();
        pool.release(id);
        assert_eq!(pool.busy(), 2);
        assert!(pool.try_dispatch());
        assert_eq!(pool.live(), 3);

        let mut draining = DrainingVus::default();
        pool.drain_into(&mut draining, Instant::now() + Duration::from_secs(30));
        assert_eq!(draining.len(), 3);

        let mut tally = VuTally::default();
        while !draining.is_empty() {
            time::sleep(Duration::from_millis(100)).await;
            draining.reap(Instant::now(), &mut tally).await;
        }
        assert_eq!(tally.completed, 4);
        assert_eq!(tally.aborted, 0);

        assert_eq!(collector.finish().await.unwrap().samples().len(), 4);
    }

    #[tokio::test]
    async fn pre_allocation_is_capped_by_max() {
        let collector = MetricsCollector::spawn(RunClock::start(), None);
        let pool = pool(&collector, 10, 4);
        assert_eq!(pool.live(), 4);
    }
}
