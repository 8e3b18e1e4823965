use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use super::{MetricEvent, Reporter, ReporterConfig, SampleSet};
use crate::clock::{RunClock, Ticker};

/// Append-only producer side of the metrics store.
///
/// Recording never blocks and keeps the order in which events were recorded.
#[derive(Debug, Clone)]
pub struct MetricsSink {
    tx: mpsc::UnboundedSender<MetricEvent>,
}

impl MetricsSink {
    pub fn record(&self, event: MetricEvent) {
        if let Err(err) = self.tx.send(event) {
            tracing::trace!(
                scenario = %err.0.scenario(),
                "metrics collector is finished: drop metric event"
            );
        }
    }
}

enum Command {
    Snapshot(oneshot::Sender<SampleSet>),
    Finish,
}

/// Cloneable handle to request snapshots from a running collector.
#[derive(Debug, Clone)]
pub struct CollectorHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl CollectorHandle {
    /// Copy of everything collected so far,
    /// or `None` if the collector already finished.
    pub async fn snapshot(&self) -> Option<SampleSet> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx.send(Command::Snapshot(reply_tx)).ok()?;
        reply_rx.await.ok()
    }
}

/// Owner of the collector task.
#[derive(Debug)]
pub struct MetricsCollector {
    sink: MetricsSink,
    handle: CollectorHandle,
    task: JoinHandle<SampleSet>,
}

impl MetricsCollector {
    pub fn spawn(clock: RunClock, reporter: Option<ReporterConfig>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(collect(clock, event_rx, cmd_rx, reporter));

        Self {
            sink: MetricsSink { tx: event_tx },
            handle: CollectorHandle { cmd_tx },
            task,
        }
    }

    pub fn sink(&self) -> MetricsSink {
        self.sink.clone()
    }

    pub fn handle(&self) -> CollectorHandle {
        self.handle.clone()
    }

    /// Stop collecting and return the final sample set.
    ///
    /// Events already recorded are still included,
    /// events recorded after this call are dropped.
    pub async fn finish(self) -> Result<SampleSet, BoxError> {
        let Self { sink, handle, task } = self;
        drop(sink);

        if handle.cmd_tx.send(Command::Finish).is_err() {
            tracing::debug!("metrics collector exited before finish command");
        }

        task.await.context("join metrics collector task")
    }
}

async fn collect(
    clock: RunClock,
    mut event_rx: mpsc::UnboundedReceiver<MetricEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    reporter: Option<ReporterConfig>,
) -> SampleSet {
    let mut store = SampleSet::default();

    let (mut reporter, mut ticker) = match reporter {
        Some(ReporterConfig { reporter, interval }) => {
            let mut ticker = Ticker::new(interval);
            ticker.tick().await;
            (Some(reporter), Some(ticker))
        }
        None => (None, None),
    };

    loop {
        tokio::select! {
            maybe_cmd = cmd_rx.recv() => match maybe_cmd {
                Some(Command::Snapshot(reply_tx)) => {
                    let mut snapshot = store.clone();
                    snapshot.set_window(clock.elapsed());
                    if reply_tx.send(snapshot).is_err() {
                        tracing::debug!("metrics snapshot requester went away");
                    }
                }
                Some(Command::Finish) | None => {
                    tracing::debug!("metrics collector: finish");
                    break;
                }
            },

            maybe_event = event_rx.recv() => {
                let Some(event) = maybe_event else {
                    tracing::debug!("metrics collector: all sinks dropped");
                    break;
                };
                record(&mut store, reporter.as_deref_mut(), event);
            }

            _ = next_tick(ticker.as_mut()) => {
                if let Some(reporter) = reporter.as_deref_mut() {
                    reporter.on_tick(clock.elapsed());
                }
            }
        }
    }

    event_rx.close();
    while let Some(event) = event_rx.recv().await {
        record(&mut store, reporter.as_deref_mut(), event);
    }

    store.set_window(clock.elapsed());
    if let Some(reporter) = reporter.as_deref_mut() {
        reporter.finish();
    }

    tracing::debug!(
        samples = store.samples().len(),
        dropped = store.dropped().len(),
        aborted = store.aborted().len(),
        "metrics collector finished"
    );

    store
}

fn record(store: &mut SampleSet, reporter: Option<&mut dyn Reporter>, event: MetricEvent) {
    if let Some(reporter) = reporter {
        reporter.on_event(&event);
    }
    store.push(event);
}

async fn next_tick(ticker: Option<&mut Ticker>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
