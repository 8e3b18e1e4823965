use std::path::PathBuf;

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};

use clap::Args;
use loadshape_lib::threshold;

#[derive(Debug, Clone, Args)]
/// validate a run configuration without generating any load
pub struct ValidateCommand {
    /// path to the JSON run configuration
    #[arg(value_name = "CONFIG", required = true)]
    config: PathBuf,
}

pub async fn exec(args: ValidateCommand) -> Result<(), BoxError> {
    let config = super::load_config(&args.config).await?;

    let rules = threshold::parse_rules(
        config
            .thresholds()
            .iter()
            .map(|(metric, expression)| (metric.as_str(), expression.as_str())),
    )
    .context("parse thresholds")?;

    for spec in config.scenarios() {
        tracing::debug!(scenario = %spec.name(), executor = %spec.kind(), "scenario is valid");
        println!(
            "scenario {}: executor={} start={:?} duration={:?} max_vus={}",
            spec.name(),
            spec.kind(),
            spec.start_time(),
            spec.nominal_duration(),
            spec.max_vus(),
        );
    }

    for rule in &rules {
        println!("threshold {}: {}", rule.metric(), rule.expression());
    }

    println!(
        "config is valid: {} scenario(s), {} threshold(s)",
        config.scenarios().len(),
        rules.len(),
    );

    Ok(())
}
