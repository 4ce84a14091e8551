// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Player configuration via `streamplay.toml`.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::core::bus::DispatchMode;
use crate::core::{Result, StreamError};

/// How bus messages reach the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum DispatchConfig {
    Poll {
        #[serde(default = "default_poll_interval_ms")]
        poll_interval_ms: u64,
    },
    EventLoop,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::Poll {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn mode(&self) -> DispatchMode {
        match *self {
            Self::Poll { poll_interval_ms } => DispatchMode::Poll {
                interval: Duration::from_millis(poll_interval_ms),
            },
            Self::EventLoop => DispatchMode::EventLoop,
        }
    }
}

/// Properties applied to `rtsp://` sources.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RtspConfig {
    pub latency_ms: u32,
    pub drop_on_latency: bool,
    pub do_retransmission: bool,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            latency_ms: 40,
            drop_on_latency: true,
            do_retransmission: false,
        }
    }
}

impl RtspConfig {
    pub const ENV_LATENCY: &'static str = "STREAMPLAY_RTSP_LATENCY";
    pub const ENV_DROP_ON_LATENCY: &'static str = "STREAMPLAY_RTSP_DROP_ON_LATENCY";
    pub const ENV_DO_RETRANSMISSION: &'static str = "STREAMPLAY_RTSP_DO_RETRANSMISSION";

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Unparsable values are ignored with a warning.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(Self::ENV_LATENCY) {
            match raw.trim().parse::<u32>() {
                Ok(v) => self.latency_ms = v,
                Err(_) => tracing::warn!("[config] Ignoring {}={:?}", Self::ENV_LATENCY, raw),
            }
        }
        if let Some(raw) = lookup(Self::ENV_DROP_ON_LATENCY) {
            match parse_flag(&raw) {
                Some(v) => self.drop_on_latency = v,
                None => tracing::warn!("[config] Ignoring {}={:?}", Self::ENV_DROP_ON_LATENCY, raw),
            }
        }
        if let Some(raw) = lookup(Self::ENV_DO_RETRANSMISSION) {
            match parse_flag(&raw) {
                Some(v) => self.do_retransmission = v,
                None => tracing::warn!("[config] Ignoring {}={:?}", Self::ENV_DO_RETRANSMISSION, raw),
            }
        }
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when neither `STREAMPLAY_LOG` nor `RUST_LOG` is set.
    pub default_directive: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            ansi: true,
        }
    }
}

/// Player configuration from `streamplay.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Upper bound for blocking state transitions.
    pub state_change_timeout_ms: u64,
    pub dispatch: DispatchConfig,
    /// Interval of position notifications while playing.
    pub position_update_interval_ms: u64,
    /// How long buffering must stay at 0% before the status becomes Stalled.
    pub stalled_debounce_ms: u64,
    /// Buffer level at which the status flips from Buffering to Buffered.
    pub buffered_threshold_percent: i32,
    /// `ring-buffer-max-size` of the decoder, in bytes.
    pub ring_buffer_max_size: u64,
    pub rtsp: RtspConfig,
    pub logging: LoggingConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            state_change_timeout_ms: 1000,
            dispatch: DispatchConfig::default(),
            position_update_interval_ms: 100,
            stalled_debounce_ms: 500,
            buffered_threshold_percent: 100,
            ring_buffer_max_size: 2 * 1024 * 1024,
            rtsp: RtspConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl PlayerConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "streamplay.toml";

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| StreamError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory. Returns error if the file is
    /// missing, cannot be parsed or fails validation.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            StreamError::Configuration(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let config = Self::from_toml_str(&content).map_err(|e| {
            StreamError::Configuration(format!("{}: {}", config_path.display(), e))
        })?;

        tracing::info!("[config] Loaded player config from {}", config_path.display());
        Ok(config)
    }

    /// Load configuration from a directory, returning defaults if the file is
    /// missing or invalid.
    pub fn load_or_default(dir: &Path) -> Self {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            tracing::debug!(
                "[config] No {} found in {}, using defaults",
                Self::FILE_NAME,
                dir.display()
            );
            return Self::default();
        }

        match Self::load(dir) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("[config] {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.state_change_timeout_ms == 0 {
            return Err(StreamError::Configuration(
                "state_change_timeout_ms must be greater than zero".into(),
            ));
        }
        if let DispatchConfig::Poll { poll_interval_ms: 0 } = self.dispatch {
            return Err(StreamError::Configuration(
                "dispatch.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.position_update_interval_ms == 0 {
            return Err(StreamError::Configuration(
                "position_update_interval_ms must be greater than zero".into(),
            ));
        }
        if !(1..=100).contains(&self.buffered_threshold_percent) {
            return Err(StreamError::Configuration(format!(
                "buffered_threshold_percent must be within 1..=100, got {}",
                self.buffered_threshold_percent
            )));
        }
        Ok(())
    }

    pub fn state_change_timeout(&self) -> Duration {
        Duration::from_millis(self.state_change_timeout_ms)
    }

    pub fn position_update_interval(&self) -> Duration {
        Duration::from_millis(self.position_update_interval_ms)
    }

    pub fn stalled_debounce(&self) -> Duration {
        Duration::from_millis(self.stalled_debounce_ms)
    }
}
