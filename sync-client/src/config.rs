//! Configuration loading for the sync engine.
//!
//! Configuration is loaded from a TOML file or string; every field has a
//! default, so an empty file is valid.
//!
//! ```toml
//! throttle_ms = 200
//! discovery_key_grace_ms = 500
//! autostop_data_sync_after_ms = 300000
//!
//! [namespaces]
//! all = ["auth", "config", "data", "blobIndex", "blob"]
//! presync = ["auth", "config", "blobIndex"]
//! ```

use offgrid_sync_core::validate_autostop;
use offgrid_sync_types::{NamespaceConfig, SyncError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Minimum spacing between recomputations triggered by core activity
    /// (default: 200ms).
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// How long discovery keys for unknown cores are kept (default: 500ms).
    #[serde(default = "default_discovery_key_grace_ms")]
    pub discovery_key_grace_ms: u64,
    /// Stop data sync after this long with no new data (default: off).
    #[serde(default)]
    pub autostop_data_sync_after_ms: Option<u64>,
    /// Tracked and presync namespaces.
    #[serde(default)]
    pub namespaces: NamespaceConfig,
}

// Default value functions
fn default_throttle_ms() -> u64 {
    200
}

fn default_discovery_key_grace_ms() -> u64 {
    500
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            discovery_key_grace_ms: default_discovery_key_grace_ms(),
            autostop_data_sync_after_ms: None,
            namespaces: NamespaceConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), SyncError> {
        validate_autostop(self.autostop_data_sync_after())?;
        Ok(())
    }

    /// Recomputation throttle interval.
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Discovery-key buffering grace period.
    pub fn discovery_key_grace(&self) -> Duration {
        Duration::from_millis(self.discovery_key_grace_ms)
    }

    /// Initial autostop timeout.
    pub fn autostop_data_sync_after(&self) -> Option<Duration> {
        self.autostop_data_sync_after_ms.map(Duration::from_millis)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Configuration parsed but holds an invalid value.
    #[error("invalid config: {0}")]
    Invalid(#[from] SyncError),
}
