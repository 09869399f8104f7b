//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which filesystem notification backend drives local copy progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackendKind {
    /// inotify on Linux, polling elsewhere
    #[default]
    Auto,
    /// Kernel inotify (Linux only)
    Inotify,
    /// Periodic directory scans
    Polling,
}

/// Transfer engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Parent directory for per-session staging directories
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,

    /// URI authorities whose final placement is owned by the remote service
    /// (no staging directory, no promotion copy)
    #[serde(default = "default_remote_owned_authorities")]
    pub remote_owned_authorities: Vec<String>,

    /// Notification backend for local copy progress
    #[serde(default)]
    pub watch_backend: WatchBackendKind,

    /// Scan interval for the polling backend, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How often a blocked remote session re-checks cancellation, in milliseconds
    #[serde(default = "default_cancel_poll_interval_ms")]
    pub cancel_poll_interval_ms: u64,
}

impl TransferConfig {
    /// Polling backend scan interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Remote wait cancellation check interval
    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms)
    }

    /// Whether `authority` places remote content itself
    pub fn is_remote_owned(&self, authority: &str) -> bool {
        self.remote_owned_authorities.iter().any(|a| a == authority)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            staging_root: default_staging_root(),
            remote_owned_authorities: default_remote_owned_authorities(),
            watch_backend: WatchBackendKind::default(),
            poll_interval_ms: default_poll_interval_ms(),
            cancel_poll_interval_ms: default_cancel_poll_interval_ms(),
        }
    }
}

fn default_staging_root() -> PathBuf {
    std::env::temp_dir().join("lamco-clipboard-staging")
}

fn default_remote_owned_authorities() -> Vec<String> {
    vec!["media".to_string()]
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_cancel_poll_interval_ms() -> u64 {
    100
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("pretty", "compact", "json")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
