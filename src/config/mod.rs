//! Configuration management
//!
//! Handles loading and validation of engine configuration from TOML files.
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod types;

pub use types::{LoggingConfig, TransferConfig, WatchBackendKind};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Transfer engine configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.transfer.staging_root.as_os_str().is_empty() {
            anyhow::bail!("staging_root must not be empty");
        }

        if self.transfer.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }

        if self.transfer.cancel_poll_interval_ms == 0 {
            anyhow::bail!("cancel_poll_interval_ms must be greater than zero");
        }

        #[cfg(not(target_os = "linux"))]
        if self.transfer.watch_backend == WatchBackendKind::Inotify {
            anyhow::bail!("inotify watch backend is only available on Linux");
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("Invalid log level: {}", other),
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            other => anyhow::bail!("Invalid log format: {}", other),
        }

        Ok(())
    }
}
