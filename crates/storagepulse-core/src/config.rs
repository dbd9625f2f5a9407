//! Monitor configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration consumed by the monitoring engine.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct MonitorConfig {
    /// SQLite database file.
    #[builder(default = "default_database_path()")]
    pub database_path: PathBuf,

    /// Seconds between periodic full cycles.
    #[builder(default = "3600")]
    pub scan_interval_secs: u64,

    /// Quiet period after the last change event before a root is rescanned.
    #[builder(default = "2000")]
    pub settle_window_ms: u64,

    /// Upper bound on how long a continuously changing root waits.
    #[builder(default = "30_000")]
    pub max_settle_delay_ms: u64,

    /// Roots scanned concurrently within one cycle.
    #[builder(default = "2")]
    pub max_concurrent_roots: usize,

    /// Consecutive store-failed cycles before health degrades.
    #[builder(default = "3")]
    pub store_failure_threshold: u32,

    /// Capacity of the recent log ring exposed in the status.
    #[builder(default = "100")]
    pub log_capacity: usize,

    /// Subscribe to filesystem change notifications.
    #[builder(default = "true")]
    pub watch_enabled: bool,

    /// Scan a root immediately after it is added.
    #[builder(default = "true")]
    pub scan_on_add: bool,

    /// Glob patterns for entry names skipped by the scanner.
    #[builder(default)]
    pub exclude_patterns: Vec<String>,

    /// File records buffered before each store write.
    #[builder(default = "512")]
    pub record_batch_size: usize,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("storagepulse.sqlite")
}

impl MonitorConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.scan_interval_secs == Some(0) {
            return Err("scan_interval_secs must be greater than 0".to_string());
        }
        if self.max_concurrent_roots == Some(0) {
            return Err("max_concurrent_roots must be greater than 0".to_string());
        }
        if self.record_batch_size == Some(0) {
            return Err("record_batch_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl MonitorConfig {
    /// Create a new config builder.
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    /// Load configuration from a TOML file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "scan_interval_secs must be greater than 0".into(),
            ));
        }
        if self.max_concurrent_roots == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_roots must be greater than 0".into(),
            ));
        }
        if self.record_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "record_batch_size must be greater than 0".into(),
            ));
        }
        if self.max_settle_delay_ms < self.settle_window_ms {
            return Err(ConfigError::Invalid(
                "max_settle_delay_ms must not be shorter than settle_window_ms".into(),
            ));
        }
        Ok(())
    }

    /// Periodic cycle interval.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Change-event settle window.
    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    /// Maximum delay before a continuously changing root is rescanned.
    pub fn max_settle_delay(&self) -> Duration {
        Duration::from_millis(self.max_settle_delay_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            scan_interval_secs: 3600,
            settle_window_ms: 2000,
            max_settle_delay_ms: 30_000,
            max_concurrent_roots: 2,
            store_failure_threshold: 3,
            log_capacity: 100,
            watch_enabled: true,
            scan_on_add: true,
            exclude_patterns: Vec::new(),
            record_batch_size: 512,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = MonitorConfig::builder()
            .database_path("/tmp/monitor.sqlite")
            .scan_interval_secs(60u64)
            .watch_enabled(false)
            .build()
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/monitor.sqlite"));
        assert_eq!(config.scan_interval(), Duration::from_secs(60));
        assert!(!config.watch_enabled);
        assert_eq!(config.max_concurrent_roots, 2);
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = MonitorConfig::builder().scan_interval_secs(0u64).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_default_interval_is_one_hour() {
        let config = MonitorConfig::default();
        assert_eq!(config.scan_interval_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        let config = MonitorConfig::load(None).unwrap();
        assert_eq!(config.log_capacity, 100);
    }
}
