// src/logging.rs

//! Logging setup for `fsrefresh` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. an explicit level passed by the embedding application
//! 2. `FSREFRESH_LOG` environment variable (e.g. "info", "debug")
//! 3. `[logging].level` from the config file
//! 4. default to `info`
//!
//! Logs are sent to STDERR.

use anyhow::{Result, anyhow};
use serde::Deserialize;
use tracing_subscriber::fmt;

/// Environment variable consulted when no explicit level is given.
pub const LOG_ENV_VAR: &str = "FSREFRESH_LOG";

/// Log level as exposed to configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Initialise global logging subscriber.
///
/// Safe to call once at startup; a second call fails because a global
/// subscriber is already installed.
pub fn init_logging(explicit: Option<LogLevel>, configured: Option<LogLevel>) -> Result<()> {
    let level = resolve_level(
        explicit,
        std::env::var(LOG_ENV_VAR).ok().as_deref(),
        configured,
    );

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}

fn resolve_level(
    explicit: Option<LogLevel>,
    env_value: Option<&str>,
    configured: Option<LogLevel>,
) -> tracing::Level {
    explicit
        .map(level_from_log_level)
        .or_else(|| env_value.and_then(parse_level_str))
        .or_else(|| configured.map(level_from_log_level))
        .unwrap_or(tracing::Level::INFO)
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
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_level_wins() {
        let lvl = resolve_level(Some(LogLevel::Trace), Some("error"), Some(LogLevel::Warn));
        assert_eq!(lvl, tracing::Level::TRACE);
    }

    #[test]
    fn env_beats_config() {
        let lvl = resolve_level(None, Some(" Warning "), Some(LogLevel::Debug));
        assert_eq!(lvl, tracing::Level::WARN);
    }

    #[test]
    fn unparsable_env_falls_back_to_config_then_info() {
        assert_eq!(
            resolve_level(None, Some("loud"), Some(LogLevel::Debug)),
            tracing::Level::DEBUG
        );
        assert_eq!(resolve_level(None, None, None), tracing::Level::INFO);
    }
}
