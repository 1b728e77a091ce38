//! Configuration structures for the watchdog server binary.
//!
//! Supports TOML deserialization with sensible defaults, following the same
//! pattern as the rest of this ecosystem's runtime configs: humantime
//! strings for durations, `#[serde(default)]` on every struct so a partial
//! TOML file still produces a complete config.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for `wd-daemon`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name this server registers its mailbox endpoint under (endpoint
    /// becomes `"<name>.server"`).
    pub name: String,

    /// Interval between expiration-detection scan passes.
    #[serde(with = "humantime_serde")]
    pub scan_period: Duration,

    /// Optional fleet bring-up synchronization barrier. When set, the
    /// server blocks at startup waiting for registrations before entering
    /// its normal request/scan loop.
    pub synchronization: Option<SynchronizationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::from("fleet-watchdog"),
            scan_period: Duration::from_millis(100),
            synchronization: None,
        }
    }
}

/// Configuration for the optional fleet bring-up barrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynchronizationConfig {
    /// Per-attempt timeout while waiting for registrations.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Number of consecutive timeouts tolerated before the barrier releases.
    pub base_ttl: u32,
}

impl Default for SynchronizationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(200),
            base_ttl: 10,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
