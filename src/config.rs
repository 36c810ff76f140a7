//! Runtime configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Invalid configuration: {0}")]
    ParseError(String),
}

/// Presence heartbeat and liveness policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// How often the local presence record is re-broadcast
    pub heartbeat_interval_ms: u64,
    /// A presence record older than this is considered gone
    pub presence_timeout_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 20_000,
            presence_timeout_ms: 60_000,
        }
    }
}

impl PresenceConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_millis(self.presence_timeout_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoauthorConfig {
    pub presence: PresenceConfig,
}

impl CoauthorConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Self =
            serde_json::from_str(&json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        if config.presence.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ParseError(
                "heartbeat_interval_ms must be positive".into(),
            ));
        }
        log::info!("loaded configuration from {}", path.display());
        Ok(config)
    }
}
