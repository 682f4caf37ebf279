//! TOML configuration for limits and timing.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error type for configuration loading.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CmdlinkConfig {
    /// Capacity limits.
    pub limits: LimitsConfig,
    /// Timers and grace windows.
    pub timing: TimingConfig,
}

impl CmdlinkConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load from an optional path, falling back to defaults.
    #[must_use]
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(path) => match Self::load(path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "using default config");
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }
}

/// Capacity limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrently tracked sessions.
    pub max_sessions: usize,
    /// Maximum live processes.
    pub max_processes: usize,
    /// Output records retained per session before compaction.
    pub history_cap: usize,
    /// Records kept after a compaction.
    pub history_keep: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: 50,
            max_processes: 50,
            history_cap: 10_000,
            history_keep: 5_000,
        }
    }
}

/// Timers and grace windows, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    /// Grace between a termination request and the forced kill.
    pub grace_period_secs: u64,
    /// How long terminated process entries linger for late events.
    pub drain_window_secs: u64,
    /// Pending partial-line flush timeout.
    pub line_flush_secs: u64,
    /// Garbage-collection sweep interval.
    pub gc_interval_secs: u64,
    /// How long terminated sessions are retained for observability.
    pub terminated_grace_secs: u64,
    /// Inactivity timeout after which a session is force-terminated.
    pub idle_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 5,
            drain_window_secs: 5,
            line_flush_secs: 5,
            gc_interval_secs: 60,
            terminated_grace_secs: 300,
            idle_timeout_secs: 3600,
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    #[must_use]
    pub fn drain_window(&self) -> Duration {
        Duration::from_secs(self.drain_window_secs)
    }

    #[must_use]
    pub fn line_flush(&self) -> Duration {
        Duration::from_secs(self.line_flush_secs)
    }

    #[must_use]
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    #[must_use]
    pub fn terminated_grace(&self) -> Duration {
        Duration::from_secs(self.terminated_grace_secs)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
