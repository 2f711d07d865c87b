//! Configuration for the sensor monitor.

use crate::monitor::SupervisorConfig;
use crate::store::RosterKeys;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the sensor monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection URL of the Redis store
    pub redis_url: String,

    /// Upper bound on concurrent pollers
    pub max_workers: usize,

    /// Pause between two poll cycles
    #[serde(with = "duration_serde")]
    pub measurement_period: Duration,

    /// Bounded wait of the roster watcher
    #[serde(with = "duration_serde")]
    pub watch_timeout: Duration,

    /// Consecutive failed cycles before a poller is reported degraded
    pub degraded_after: u32,

    /// Names of the store keys
    pub keys: RosterKeys,

    /// Path for storing persisted stats
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-monitor");

        Self {
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            max_workers: 8,
            measurement_period: Duration::from_secs(10),
            watch_timeout: Duration::from_secs(1),
            degraded_after: 3,
            keys: RosterKeys::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-monitor")
            .join("config.json")
    }

    /// Path of the persisted stats file.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Reject values the monitor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.measurement_period.is_zero() {
            return Err(ConfigError::Invalid(
                "measurement_period must be positive".to_string(),
            ));
        }
        if self.watch_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "watch_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for a [`crate::MonitorSupervisor`].
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_workers: self.max_workers,
            measurement_period: self.measurement_period,
            watch_timeout: self.watch_timeout,
            degraded_after: self.degraded_after,
            keys: self.keys.clone(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration, as fractional seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379/0");
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.measurement_period, Duration::from_secs(10));
        assert_eq!(config.watch_timeout, Duration::from_secs(1));
        assert_eq!(config.keys.records, "sensors:functions");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor-monitor").join("config.json");

        let config = Config {
            max_workers: 3,
            measurement_period: Duration::from_millis(2500),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_workers": 2, "measurement_period": 0.5}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.measurement_period, Duration::from_millis(500));
        assert_eq!(config.redis_url, Config::default().redis_url);
    }

    #[test]
    fn test_rejects_zero_period() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"measurement_period": 0}"#).unwrap();
        assert_matches!(Config::load_from(&path), Err(ConfigError::Invalid(_)));

        std::fs::write(&path, "not json").unwrap();
        assert_matches!(Config::load_from(&path), Err(ConfigError::Parse(_)));
    }

    #[test]
    fn test_supervisor_config() {
        let config = Config {
            max_workers: 4,
            degraded_after: 5,
            ..Config::default()
        };
        let settings = config.supervisor_config();
        assert_eq!(settings.max_workers, 4);
        assert_eq!(settings.degraded_after, 5);
        assert_eq!(settings.keys, config.keys);
    }
}
