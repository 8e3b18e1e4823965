//! Run orchestration: every scenario of a [`RunConfig`] runs concurrently on its
//! own task, sharing nothing but the metrics collector.

use std::{sync::Arc, time::Duration};

use rama::{
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    telemetry::tracing,
};

use crate::{
    clock::{RunClock, Ticker},
    config::RunConfig,
    executor::{ScenarioReport, ScenarioRuntime, run_scenario},
    metrics::{CollectorHandle, MetricsCollector, ReporterConfig, SampleSet},
    threshold::{self, ThresholdReport, ThresholdRule},
    vu::VuContext,
    workload::{WorkItemSelector, Workload},
};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Period of the scheduling control loops.
    pub tick: Duration,
    /// Time in-flight iterations get to finish once the run is stopped,
    /// after which they are aborted.
    pub hard_stop_grace: Duration,
    /// Evaluate thresholds on a snapshot of the metrics this often while running.
    pub threshold_interval: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tick: Ticker::DEFAULT_PERIOD,
            hard_stop_grace: Duration::from_secs(5),
            threshold_interval: None,
        }
    }
}

/// Outcome of a complete run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// In configuration order.
    pub scenarios: Vec<ScenarioReport>,
    pub samples: SampleSet,
    pub thresholds: ThresholdReport,
    /// The run was stopped before every scenario ended on its own.
    pub partial: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.thresholds.passed()
    }
}

pub struct ScenarioEngine<W: Workload> {
    config: RunConfig,
    workload: Arc<W>,
    selector: Arc<dyn WorkItemSelector<W::Item>>,
    options: EngineOptions,
    reporter: Option<ReporterConfig>,
}

impl<W: Workload> std::fmt::Debug for ScenarioEngine<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioEngine")
            .field("config", &self.config)
            .field("options", &self.options)
            .field("reporter", &self.reporter)
            .finish()
    }
}

impl<W: Workload> ScenarioEngine<W> {
    pub fn new(
        config: RunConfig,
        workload: W,
        selector: impl WorkItemSelector<W::Item>,
    ) -> Self {
        Self {
            config,
            workload: Arc::new(workload),
            selector: Arc::new(selector),
            options: EngineOptions::default(),
            reporter: None,
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_reporter(mut self, reporter: ReporterConfig) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Run all scenarios to completion.
    ///
    /// Cancelling the guard stops the run: scheduling stops, VUs drain and
    /// iterations still running after the hard stop grace are aborted.
    /// The report of such a run is marked partial.
    pub async fn run(self, guard: ShutdownGuard) -> Result<RunReport, BoxError> {
        let Self {
            config,
            workload,
            selector,
            options,
            reporter,
        } = self;

        let rules = threshold::parse_rules(
            config
                .thresholds()
                .iter()
                .map(|(metric, expression)| (metric.as_str(), expression.as_str())),
        )
        .context("parse thresholds")?;

        let clock = RunClock::start();
        let collector = MetricsCollector::spawn(clock, reporter);

        let monitor = options.threshold_interval.filter(|_| !rules.is_empty()).map(|interval| {
            tokio::spawn(monitor_thresholds(
                collector.handle(),
                rules.clone(),
                interval,
            ))
        });

        tracing::info!(
            scenarios = config.scenarios().len(),
            thresholds = rules.len(),
            "run started"
        );

        let tasks: Vec<_> = config
            .scenarios()
            .iter()
            .map(|spec| {
                let ctx = VuContext {
                    scenario: spec.name().clone(),
                    workload: workload.clone(),
                    selector: selector.clone(),
                    sink: collector.sink(),
                    clock,
                };
                let runtime = ScenarioRuntime::new(
                    spec.clone(),
                    ctx,
                    options.tick,
                    options.hard_stop_grace,
                    guard.clone(),
                );
                tokio::spawn(run_scenario(runtime))
            })
            .collect();

        let mut scenarios = Vec::with_capacity(tasks.len());
        for task in tasks {
            scenarios.push(task.await.context("join scenario task")?);
        }

        if let Some(monitor) = monitor {
            monitor.abort();
        }

        let samples = collector.finish().await.context("finish metrics collector")?;
        let partial = scenarios.iter().any(|report| report.interrupted);

        let mut thresholds = threshold::evaluate(&rules, &samples);
        if partial {
            thresholds.mark_partial();
        }

        for failure in thresholds.failures() {
            tracing::warn!(
                metric = %failure.metric,
                expression = %failure.expression,
                observed = ?failure.observed,
                status = ?failure.status,
                "threshold failed"
            );
        }

        let elapsed = clock.elapsed();
        tracing::info!(
            ?elapsed,
            samples = samples.samples().len(),
            partial,
            passed = thresholds.passed(),
            "run finished"
        );

        Ok(RunReport {
            scenarios,
            samples,
            thresholds,
            partial,
            elapsed,
        })
    }
}

/// Periodically evaluate the thresholds on a snapshot, for visibility only.
async fn monitor_thresholds(
    handle: CollectorHandle,
    rules: Vec<ThresholdRule>,
    interval: Duration,
) {
    let mut ticker = Ticker::new(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(snapshot) = handle.snapshot().await else {
            tracing::debug!("threshold monitor: collector finished");
            return;
        };

        let report = threshold::evaluate(&rules, &snapshot);
        for failure in report.failures() {
            tracing::warn!(
                metric = %failure.metric,
                expression = %failure.expression,
                observed = ?failure.observed,
                window = ?snapshot.window(),
                "threshold currently failing"
            );
        }
        if report.passed() {
            tracing::debug!(window = ?snapshot.window(), "thresholds currently passing");
        }
    }
}
