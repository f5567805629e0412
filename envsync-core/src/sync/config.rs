//! Sync engine configuration.

use crate::connection::ConnectionConfig;
use crate::queue::DEFAULT_CAPACITY;
use crate::{EnvSyncError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Every tunable of the sync engine. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api_url: String,
    /// Files above this size are rejected before any network call
    pub max_file_size: u64,
    /// Consecutive `NotFound` responses before auto-recovery stops
    pub not_found_threshold: u32,
    pub poll_interval_secs: u64,
    pub queue_capacity: usize,
    /// Quiet period before a burst of local changes is synced
    pub local_change_quiet_ms: u64,
    pub connection: ConnectionConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8787".to_string(),
            max_file_size: 256 * 1024,
            not_found_threshold: 3,
            poll_interval_secs: 60,
            queue_capacity: DEFAULT_CAPACITY,
            local_change_quiet_ms: 500,
            connection: ConnectionConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let config: Self = toml::from_str(&content).map_err(|e| {
            EnvSyncError::InvalidInput(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| EnvSyncError::InvalidInput(format!("Config encoding failed: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(EnvSyncError::InvalidInput(msg.to_string()));
        if self.not_found_threshold == 0 {
            return invalid("not_found_threshold must be at least 1");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1");
        }
        if self.poll_interval_secs == 0 {
            return invalid("poll_interval_secs must be at least 1");
        }
        if self.connection.offline_after_failures == 0 {
            return invalid("connection.offline_after_failures must be at least 1");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn local_change_quiet_period(&self) -> Duration {
        Duration::from_millis(self.local_change_quiet_ms)
    }
}
