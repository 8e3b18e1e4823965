use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use rama::{
    error::{BoxError, ErrorContext as _, ErrorExt as _},
    graceful::ShutdownGuard,
    telemetry::tracing,
};

use clap::Args;
use loadshape_lib::{
    engine::{EngineOptions, ScenarioEngine},
    metrics::{Reporter, ReporterConfig},
    vu::VuId,
    workload::{Dataset, WorkItemSelector},
};

pub mod reporter;
pub mod summary;
pub mod workload;

use self::{
    reporter::{HumanReporter, JsonlReporter},
    workload::{SimulatedWorkload, SimulationConfig},
};
use super::secs_arg;

#[derive(Debug, Clone, Args)]
/// run the scenarios of a configuration against a simulated workload
pub struct RunCommand {
    /// path to the JSON run configuration
    #[arg(value_name = "CONFIG", required = true)]
    config: PathBuf,

    /// JSON array of work items, VU `i` gets item `i % len`
    #[arg(long, value_name = "JSON_FILE")]
    dataset: Option<PathBuf>,

    /// report json lines instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    json: bool,

    /// with --json: also write a line per iteration
    #[arg(long, default_value_t = false)]
    events: bool,

    /// period of the scheduling loops
    #[arg(long, value_name = "MILLIS", default_value_t = 5)]
    tick_ms: u64,

    #[clap(flatten)]
    simulation: SimulationConfig,

    /// evaluate thresholds while running (<= 0.0 = only at the end)
    #[arg(long, value_name = "SECONDS", default_value_t = 0.)]
    threshold_interval: f64,

    /// time in-flight iterations get once the run is stopped, before being aborted
    #[arg(long, value_name = "SECONDS", default_value_t = 5.)]
    hard_stop_grace: f64,

    /// progress report interval
    #[arg(long, value_name = "SECONDS", default_value_t = 1.)]
    report_interval: f64,
}

pub async fn exec(guard: ShutdownGuard, args: RunCommand) -> Result<(), BoxError> {
    let config = super::load_config(&args.config).await?;

    let dataset = match &args.dataset {
        Some(path) => Some(load_dataset(path).await?),
        None => None,
    };

    let options = EngineOptions {
        tick: Duration::from_millis(args.tick_ms.max(1)),
        hard_stop_grace: secs_arg("hard-stop-grace", args.hard_stop_grace)?.unwrap_or_default(),
        threshold_interval: secs_arg("threshold-interval", args.threshold_interval)?,
    };
    let report_interval =
        secs_arg("report-interval", args.report_interval)?.unwrap_or(Duration::from_secs(1));
    let workload = SimulatedWorkload::new(&args.simulation)?;

    tracing::info!(
        scenarios = config.scenarios().len(),
        thresholds = config.thresholds().len(),
        dataset_len = dataset.as_ref().map(Dataset::len),
        ?options,
        simulation = ?args.simulation,
        "run config ready",
    );

    let reporter: Box<dyn Reporter> = if args.json {
        Box::new(JsonlReporter::new(args.events))
    } else {
        Box::new(HumanReporter::new())
    };

    let report = ScenarioEngine::new(config, workload, dataset_selector(dataset))
        .with_options(options)
        .with_reporter(ReporterConfig::new(reporter, report_interval))
        .run(guard)
        .await
        .context("run scenarios")?;

    if args.json {
        println!("{}", summary::render_json(&report));
    } else {
        print!("{}", summary::render_human(&report));
    }

    if !report.passed() {
        return Err(BoxError::from("thresholds failed")
            .context_debug_field("failures", report.thresholds.failures().count()));
    }
    if report.partial {
        return Err(BoxError::from("run was interrupted"));
    }
    Ok(())
}

async fn load_dataset(path: &Path) -> Result<Dataset<serde_json::Value>, BoxError> {
    let data = tokio::fs::read(path)
        .await
        .context("read dataset file")
        .with_context_debug_field("path", || path.to_owned())?;
    Dataset::from_json_slice(&data)
        .context("load dataset")
        .with_context_debug_field("path", || path.to_owned())
}

/// Work item of a VU: its dataset row, or null without a dataset.
fn dataset_selector(
    dataset: Option<Dataset<serde_json::Value>>,
) -> impl WorkItemSelector<serde_json::Value> {
    move |vu: VuId| match &dataset {
        Some(dataset) => dataset.get(vu).clone(),
        None => serde_json::Value::Null,
    }
}
