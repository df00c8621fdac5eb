// src/logging.rs

//! Logging setup for `compositor` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `COMPOSITOR_LOG` environment variable, either a bare level ("debug")
//!    or full filter directives ("compositor::engine=trace,info")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout only carries the request outcome.

use anyhow::{Result, anyhow};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Environment variable consulted when no `--log-level` is given.
pub const LOG_ENV: &str = "COMPOSITOR_LOG";

/// Initialise global logging subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(lvl) => level_filter(level_from_log_level(lvl)),
        None => filter_from_env(std::env::var(LOG_ENV).ok().as_deref()),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

fn filter_from_env(value: Option<&str>) -> EnvFilter {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return level_filter(tracing::Level::INFO);
    };

    match parse_level_str(value) {
        Some(level) => level_filter(level),
        None => EnvFilter::try_new(value).unwrap_or_else(|_| level_filter(tracing::Level::INFO)),
    }
}

fn level_filter(level: tracing::Level) -> EnvFilter {
    EnvFilter::default().add_directive(LevelFilter::from_level(level).into())
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_ascii_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
