//! Logging helpers for applications embedding the client.
//!
//! The library only emits `tracing` events; it never installs a subscriber
//! by itself. Applications that have no subscriber of their own can call
//! [`init_console`] or [`init_file`] once at startup.
//!
//! `RUST_LOG` takes precedence over the level passed in.

use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::error::{ClientError, Result};

/// Log file name inside the log directory
pub const LOG_FILE_NAME: &str = "batata-sdk.log";

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

/// Install a console subscriber.
pub fn init_console(level: Level) -> Result<()> {
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true);

    Registry::default()
        .with(env_filter(level))
        .with(layer)
        .try_init()
        .map_err(|e| ClientError::Other(anyhow::anyhow!("failed to install subscriber: {}", e)))
}

/// Install a daily rolling file subscriber writing to `log_dir`.
///
/// The returned guard flushes buffered output when dropped and must be kept
/// alive for as long as logging is needed.
pub fn init_file(log_dir: &Path, level: Level) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    Registry::default()
        .with(env_filter(level))
        .with(layer)
        .try_init()
        .map_err(|e| ClientError::Other(anyhow::anyhow!("failed to install subscriber: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Whichever call runs first in this process wins; the other must
        // report an error rather than panic.
        let dir = tempfile::tempdir().unwrap();
        let first = init_file(dir.path(), Level::DEBUG);
        let second = init_console(Level::INFO);
        assert!(first.is_err() || second.is_err());
    }
}
