use std::path::Path;

use sandpit_shared::constants::logging;
use sandpit_shared::errors::{SandpitError, SandpitResult};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize tracing with file logging.
///
/// Logs are written to `{log_dir}/sandpit.log` with daily rotation.
/// Returns the WorkerGuard that keeps the background writer alive.
/// A subscriber installed earlier by the host wins; the guard is still
/// returned so the writer shuts down cleanly.
pub fn init_logging(log_dir: &Path) -> SandpitResult<WorkerGuard> {
    std::fs::create_dir_all(log_dir).map_err(|e| {
        SandpitError::Storage(format!(
            "failed to create log directory {}: {}",
            log_dir.display(),
            e
        ))
    })?;

    let file_appender = tracing_appender::rolling::daily(log_dir, logging::LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging::DEFAULT_FILTER))
        .map_err(|e| SandpitError::Config(format!("invalid log filter: {}", e)))?;

    register_to_tracing(non_blocking, env_filter);

    Ok(guard)
}

pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}
