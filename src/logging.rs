// src/logging.rs

//! Logging setup for `dagengine` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `DAGENGINE_LOG` environment variable, any `EnvFilter` directive
//!    (e.g. "debug" or "dagengine::commit=trace,info")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout carries only the dry-run plan
//! and the final status.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "DAGENGINE_LOG";

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level.as_str());
    }
    env.and_then(|s| EnvFilter::try_new(s.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flag_wins_over_env() {
        let f = build_filter(Some(LogLevel::Trace), Some("error"));
        assert_eq!(f.to_string(), "trace");
    }

    #[test]
    fn env_directive_used_when_valid() {
        let f = build_filter(None, Some("dagengine=debug"));
        assert_eq!(f.to_string(), "dagengine=debug");
        assert_eq!(build_filter(None, None).to_string(), "info");
    }
}
