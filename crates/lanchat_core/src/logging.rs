use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::ChatConfig;

/// Initializes file logging under `~/.lanchat/logs/`.
///
/// The terminal belongs to the interactive prompt, so nothing is logged to
/// the console. Returns a guard that must be kept alive for the duration of
/// the app.
pub fn init_logging(level: &str) -> Result<WorkerGuard> {
    let logs_dir = ChatConfig::logs_dir()?;
    init_logging_to_dir(&logs_dir, level)
}

/// Initialize logging to a custom directory with a custom filter.
/// `RUST_LOG` takes precedence over `filter` when set.
pub fn init_logging_to_dir(logs_dir: &Path, filter: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;

    // File appender: daily rotation
    let file_appender = tracing_appender::rolling::daily(logs_dir, "lanchat");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}
