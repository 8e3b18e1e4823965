use std::{path::Path, time::Duration};

use rama::error::{BoxError, ErrorContext as _};

use loadshape_lib::config::RunConfig;

pub mod run;
pub mod validate;

/// Read and validate a JSON run configuration file.
async fn load_config(path: &Path) -> Result<RunConfig, BoxError> {
    let data = tokio::fs::read(path)
        .await
        .context("read run config file")
        .with_context_debug_field("path", || path.to_owned())?;
    RunConfig::from_json_slice(&data)
        .context("load run config")
        .with_context_debug_field("path", || path.to_owned())
}

/// Duration of a `SECONDS` argument, `None` when it is not positive.
pub(crate) fn secs_arg(name: &'static str, secs: f64) -> Result<Option<Duration>, BoxError> {
    if secs.is_nan() || secs <= 0. {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .context("seconds argument out of range")
        .context_debug_field("arg", name)
        .context_debug_field("value", secs)
}
