use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::error::{AppError, Result};

/// Default level stays at `warn` so log lines do not tear the live panel.
fn filter(verbose: bool, quiet: bool) -> EnvFilter {
    if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

/// Install the global subscriber. With `log_file`, records go through a
/// non-blocking file writer; keep the returned guard alive until exit.
pub fn init_logging(
    verbose: bool,
    quiet: bool,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let registry = tracing_subscriber::registry().with(filter(verbose, quiet));

    let Some(path) = log_file else {
        registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| AppError::Logging(e.to_string()))?;
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| AppError::Logging(format!("not a file path: {}", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    registry
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))?;
    Ok(Some(guard))
}

