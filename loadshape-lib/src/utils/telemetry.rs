use std::{io::IsTerminal as _, path::Path};

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing::{
        self,
        metadata::LevelFilter,
        subscriber::{EnvFilter, fmt::writer::BoxMakeWriter},
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryConfig<'a> {
    /// Log at DEBUG instead of INFO level by default.
    pub verbose: bool,
    /// Multi-line, human oriented log format.
    pub pretty: bool,
    /// Append logs to this file instead of writing them to stderr.
    pub output: Option<&'a Path>,
}

/// Install the global tracing subscriber.
///
/// The default level is INFO (DEBUG when verbose),
/// `RUST_LOG` overrides it, e.g. `RUST_LOG=loadshape_lib=trace`.
/// Logs go to stderr so stdout stays available for reports.
pub fn init_tracing(cfg: TelemetryConfig<'_>) -> Result<(), BoxError> {
    let directive = if cfg.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
    .into();

    let make_writer = match cfg.output {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .context("open log file")
                .with_context_debug_field("path", || path.to_owned())?;

            BoxMakeWriter::new(file)
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let subscriber = tracing::subscriber::fmt()
        .with_ansi(cfg.output.is_none() && std::io::stderr().is_terminal())
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(directive)
                .from_env_lossy(),
        )
        .with_writer(make_writer);

    if cfg.pretty {
        subscriber.pretty().try_init()?;
    } else {
        subscriber.try_init()?;
    }

    tracing::debug!(
        verbose = cfg.verbose,
        pretty = cfg.pretty,
        log_file = ?cfg.output,
        "loadshape logging ready"
    );
    Ok(())
}
