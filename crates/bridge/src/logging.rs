//! Tracing subscriber setup.
//!
//! The terminal is in raw mode during a session, so log lines go to a daily
//! rolling file instead of stderr.

use std::fs;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Log file name prefix inside the log directory.
pub const LOG_FILE_PREFIX: &str = "labshell.log";

/// Filter directive for the configured level. `verbose` forces `debug`.
pub fn filter_directive(level: &str, verbose: bool) -> String {
    if verbose {
        "debug".to_string()
    } else {
        level.to_lowercase()
    }
}

fn build_filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
    }
    EnvFilter::new(filter_directive(&config.level, verbose))
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered lines are flushed.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<WorkerGuard> {
    fs::create_dir_all(&config.directory).with_context(|| {
        format!("Failed to create log directory: {}", config.directory.display())
    })?;

    let appender = tracing_appender::rolling::daily(&config.directory, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(build_filter(config, verbose))
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(guard)
}
