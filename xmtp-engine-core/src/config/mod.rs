//! Configuration management for the engine
//!
//! Defaults match the timings the mobile client has always used; everything
//! can be overridden from a TOML file or from environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sync cron timing
    pub cron: CronConfig,

    /// Stream supervision
    pub streaming: StreamingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Teardown behaviour
    pub shutdown: ShutdownConfig,
}

/// Sync cron configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    /// How often the ticker fires
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Minimum spacing between the end of one pass and the start of the next
    #[serde(with = "humantime_serde")]
    pub min_interval: Duration,

    /// Age after which the last completed pass is reported unhealthy
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
}

/// Stream supervision configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Also start the consent stream (stopping it is unconditional)
    pub consent_stream_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

/// Shutdown configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for the engine loops to exit
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(300),
            min_interval: Duration::from_millis(1000),
            stale_after: Duration::from_secs(60),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

fn parse_duration(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| ConfigError::InvalidValue {
        key,
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    value
        .parse()
        .map_err(|e: std::str::ParseBoolError| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
        })
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: XMTP_ENGINE_<SECTION>_<KEY>
    /// Example: XMTP_ENGINE_CRON_TICK_INTERVAL=250ms
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Cron config
        if let Some(v) = lookup("XMTP_ENGINE_CRON_TICK_INTERVAL") {
            self.cron.tick_interval = parse_duration("cron.tick_interval", &v)?;
        }
        if let Some(v) = lookup("XMTP_ENGINE_CRON_MIN_INTERVAL") {
            self.cron.min_interval = parse_duration("cron.min_interval", &v)?;
        }
        if let Some(v) = lookup("XMTP_ENGINE_CRON_STALE_AFTER") {
            self.cron.stale_after = parse_duration("cron.stale_after", &v)?;
        }

        // Streaming config
        if let Some(v) = lookup("XMTP_ENGINE_STREAMING_CONSENT_STREAM_ENABLED") {
            self.streaming.consent_stream_enabled =
                parse_bool("streaming.consent_stream_enabled", &v)?;
        }

        // Logging config
        if let Some(v) = lookup("XMTP_ENGINE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("XMTP_ENGINE_LOG_JSON") {
            self.logging.json_format = parse_bool("logging.json_format", &v)?;
        }

        // Shutdown config
        if let Some(v) = lookup("XMTP_ENGINE_SHUTDOWN_TIMEOUT") {
            self.shutdown.timeout = parse_duration("shutdown.timeout", &v)?;
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cron.tick_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "cron.tick_interval must be greater than 0".to_string(),
            ));
        }

        if self.cron.min_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "cron.min_interval must be greater than 0".to_string(),
            ));
        }

        if self.cron.tick_interval > self.cron.min_interval {
            return Err(ConfigError::ValidationFailed(format!(
                "cron.tick_interval ({:?}) must not exceed cron.min_interval ({:?})",
                self.cron.tick_interval, self.cron.min_interval
            )));
        }

        if self.cron.stale_after < self.cron.min_interval {
            return Err(ConfigError::ValidationFailed(
                "cron.stale_after must be at least cron.min_interval".to_string(),
            ));
        }

        if self.shutdown.timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "shutdown.timeout must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cron.tick_interval, Duration::from_millis(300));
        assert_eq!(config.cron.min_interval, Duration::from_secs(1));
        assert!(!config.streaming.consent_stream_enabled);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.cron.tick_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.cron.tick_interval = Duration::from_secs(5);
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.shutdown.timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = EngineConfig::default();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("XMTP_ENGINE_CRON_TICK_INTERVAL", "100ms"),
            ("XMTP_ENGINE_CRON_MIN_INTERVAL", "2s"),
            ("XMTP_ENGINE_STREAMING_CONSENT_STREAM_ENABLED", "true"),
            ("XMTP_ENGINE_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.cron.tick_interval, Duration::from_millis(100));
        assert_eq!(config.cron.min_interval, Duration::from_secs(2));
        assert!(config.streaming.consent_stream_enabled);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_env_rejects_bad_duration() {
        let mut config = EngineConfig::default();
        let result = config.apply_env(|key| {
            (key == "XMTP_ENGINE_CRON_TICK_INTERVAL").then(|| "soon".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                key: "cron.tick_interval",
                ..
            })
        ));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");

        let mut config = EngineConfig::default();
        config.cron.min_interval = Duration::from_secs(3);
        config.streaming.consent_stream_enabled = true;
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = EngineConfig::from_file("/nonexistent/engine.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/engine.toml"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[cron]\nmin_interval = \"2s\"\n").unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.cron.min_interval, Duration::from_secs(2));
        assert_eq!(loaded.cron.tick_interval, Duration::from_millis(300));
        assert_eq!(loaded.logging.level, "info");
    }
}
