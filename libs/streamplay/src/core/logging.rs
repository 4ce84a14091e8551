// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Process-wide `tracing` subscriber setup.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::core::config::LoggingConfig;
use crate::core::{Result, StreamError};

/// Checked before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "STREAMPLAY_LOG";

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Pick the filter directive: `STREAMPLAY_LOG`, then `RUST_LOG`, then the
/// configured default.
pub fn resolve_directive(config: &LoggingConfig, lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup(LOG_ENV_VAR)
        .or_else(|| lookup("RUST_LOG"))
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| config.default_directive.clone())
}

/// Install the global subscriber. Returns `Ok(false)` if logging was already
/// initialized, by this function or by someone else.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    if INITIALIZED.load(Ordering::Acquire) {
        return Ok(false);
    }

    let directive = resolve_directive(config, |key| std::env::var(key).ok());
    let filter = EnvFilter::try_new(&directive).map_err(|e| {
        StreamError::Configuration(format!("Invalid log filter '{}': {}", directive, e))
    })?;

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(config.ansi)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .is_ok();

    INITIALIZED.store(true, Ordering::Release);
    if installed {
        tracing::debug!("[logging] Initialized with filter '{}'", directive);
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_resolve_directive_precedence() {
        let config = LoggingConfig::default();
        let both = |key: &str| match key {
            LOG_ENV_VAR => Some("streamplay=trace".to_string()),
            "RUST_LOG" => Some("warn".to_string()),
            _ => None,
        };
        assert_eq!(resolve_directive(&config, both), "streamplay=trace");

        let rust_log_only = |key: &str| (key == "RUST_LOG").then(|| "warn".to_string());
        assert_eq!(resolve_directive(&config, rust_log_only), "warn");

        assert_eq!(resolve_directive(&config, |_| None), "info");
    }

    #[test]
    #[serial]
    fn test_init_logging_is_idempotent() {
        let config = LoggingConfig {
            default_directive: "debug".into(),
            ansi: false,
        };
        // The first call may lose to another test's subscriber; either way
        // the second call is a no-op.
        let _ = init_logging(&config).unwrap();
        assert!(!init_logging(&config).unwrap());
    }
}
