//! Configuration for koinonia-sync

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("koinonia-sync")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage directory for the sled databases
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Ledger event bus capacity
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Hot cache capacity for durable entity reads
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Maximum attempts for transient-failure retries
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base delay for exponential backoff, in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Timeout for durable store writes, in seconds
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,

    /// Timeout for push gateway calls, in seconds
    #[serde(default = "default_push_timeout")]
    pub push_timeout_secs: u64,

    /// Maximum characters of content preview in push payloads
    #[serde(default = "default_preview_chars")]
    pub preview_max_chars: usize,

    /// Interval between orphan-notification cleanup sweeps, in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    50
}

fn default_store_timeout() -> u64 {
    10
}

fn default_push_timeout() -> u64 {
    5
}

fn default_preview_chars() -> usize {
    100
}

fn default_cleanup_interval() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            bus_capacity: default_bus_capacity(),
            cache_capacity: default_cache_capacity(),
            retry_attempts: default_retry_attempts(),
            retry_base_ms: default_retry_base_ms(),
            store_timeout_secs: default_store_timeout(),
            push_timeout_secs: default_push_timeout(),
            preview_max_chars: default_preview_chars(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get fast ledger database path
    pub fn ledger_db_path(&self) -> PathBuf {
        self.storage_dir.join("ledger.sled")
    }

    /// Get durable store database path
    pub fn durable_db_path(&self) -> PathBuf {
        self.storage_dir.join("durable.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.retry_attempts = 5;
        config.preview_max_chars = 64;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.retry_attempts, 5);
        assert_eq!(loaded.preview_max_chars, 64);
        assert_eq!(loaded.store_timeout_secs, 10);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("bus_capacity = 16").unwrap();
        assert_eq!(config.bus_capacity, 16);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.push_timeout_secs, 5);
    }
}
