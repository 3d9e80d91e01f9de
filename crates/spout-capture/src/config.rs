//! Configuration for spout-capture.
//!
//! Supports loading from TOML file with CLI argument overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::ws::WsConfig;

/// Top-level configuration for spout-capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub feed: WsConfig,
    pub sample_duration: Option<Duration>,
    pub health_log_interval: Duration,
    pub log_level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            feed: WsConfig::default(),
            sample_duration: None,
            health_log_interval: Duration::from_secs(30),
            log_level: "info".to_string(),
        }
    }
}

impl CaptureConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(
        &mut self,
        url: Option<String>,
        duration_ms: Option<u64>,
        log_level: Option<String>,
    ) {
        if let Some(url) = url {
            self.feed.url = url;
        }

        if let Some(duration_ms) = duration_ms {
            // Zero means run until stopped.
            self.sample_duration = (duration_ms > 0).then(|| Duration::from_millis(duration_ms));
        }

        if let Some(log_level) = log_level {
            self.log_level = log_level;
        }
    }
}

/// TOML file structure for deserialization.
#[derive(Debug, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralToml,
    #[serde(default)]
    feed: FeedToml,
    #[serde(default)]
    session: SessionToml,
    #[serde(default)]
    health: HealthToml,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    log_level: String,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FeedToml {
    url: String,
    subscribe_message: Option<String>,
    connect_timeout_secs: u64,
    reconnect: bool,
    initial_reconnect_delay_secs: u64,
    max_reconnect_delay_secs: u64,
    max_reconnect_attempts: u64,
    drain_timeout_ms: u64,
}

impl Default for FeedToml {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9001/stream".to_string(),
            subscribe_message: None,
            connect_timeout_secs: 10,
            reconnect: true,
            initial_reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 60,
            max_reconnect_attempts: 0,
            drain_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionToml {
    sample_duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HealthToml {
    log_interval_secs: u64,
}

impl Default for HealthToml {
    fn default() -> Self {
        Self {
            log_interval_secs: 30,
        }
    }
}

impl From<TomlConfig> for CaptureConfig {
    fn from(toml: TomlConfig) -> Self {
        Self {
            feed: WsConfig {
                url: toml.feed.url,
                subscribe_message: toml.feed.subscribe_message,
                connect_timeout: Duration::from_secs(toml.feed.connect_timeout_secs),
                reconnect: toml.feed.reconnect,
                initial_reconnect_delay: Duration::from_secs(
                    toml.feed.initial_reconnect_delay_secs,
                ),
                max_reconnect_delay: Duration::from_secs(toml.feed.max_reconnect_delay_secs),
                max_reconnect_attempts: toml.feed.max_reconnect_attempts,
                drain_timeout: Duration::from_millis(toml.feed.drain_timeout_ms),
            },
            // Zero means run until stopped, same as the CLI override.
            sample_duration: toml
                .session
                .sample_duration_ms
                .and_then(|ms| (ms > 0).then(|| Duration::from_millis(ms))),
            health_log_interval: Duration::from_secs(toml.health.log_interval_secs),
            log_level: toml.general.log_level,
        }
    }
}
