use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "engine.log";
const LOG_ENV_VAR: &str = "POMOFLOW_LOG";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber writing to `logs_dir/engine.log`.
///
/// Keep the returned guard alive for the lifetime of the process; dropping it
/// flushes and stops the background writer.
pub fn init_logging(logs_dir: &Path) -> Result<WorkerGuard, InfraError> {
    fs::create_dir_all(logs_dir)?;
    let appender = tracing_appender::rolling::never(logs_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|error| {
            InfraError::InvalidConfig(format!("failed to install log subscriber: {error}"))
        })?;
    Ok(guard)
}
