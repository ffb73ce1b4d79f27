//! Configuration management for connectors.

use crate::{ConnectorError, ConnectorResult};
use serde::{Deserialize, Serialize};
use std::env;

/// Main configuration shared by every connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector name (must be unique)
    pub connector_name: String,

    /// Retry settings for batch-level operations
    #[serde(default)]
    pub retry: RetrySettings,

    /// Polling and batching settings
    #[serde(default)]
    pub processing: ProcessingSettings,
}

/// Retry settings applied by the runtimes around `process`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum number of retries for failed operations
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff duration in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Batching and polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSettings {
    /// Batch size for batch processing
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batch timeout in milliseconds
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Poll interval in milliseconds for source connectors
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30000
}

fn default_batch_size() -> usize {
    1000
}

fn default_batch_timeout_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            log_level: default_log_level(),
        }
    }
}

/// Parse an environment variable, keeping `None` when unset or malformed
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

impl ConnectorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `CONNECTOR_NAME`: Required, unique connector name
    /// - `MAX_RETRIES`: Maximum retries (default: 3)
    /// - `RETRY_BACKOFF_MS`: Base backoff in ms (default: 1000)
    /// - `MAX_BACKOFF_MS`: Max backoff in ms (default: 30000)
    /// - `BATCH_SIZE`: Batch size (default: 1000)
    /// - `BATCH_TIMEOUT_MS`: Batch timeout in ms (default: 1000)
    /// - `POLL_INTERVAL_MS`: Poll interval in ms (default: 1000)
    /// - `LOG_LEVEL`: Log level (default: info)
    pub fn from_env() -> ConnectorResult<Self> {
        let connector_name = env::var("CONNECTOR_NAME")
            .map_err(|_| ConnectorError::config("CONNECTOR_NAME is required"))?;

        let mut config = Self {
            connector_name,
            ..Default::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> ConnectorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::config(format!("Failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ConnectorError::config(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Apply environment variable overrides to core configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CONNECTOR_NAME") {
            self.connector_name = val;
        }
        if let Some(n) = env_parse("MAX_RETRIES") {
            self.retry.max_retries = n;
        }
        if let Some(n) = env_parse("RETRY_BACKOFF_MS") {
            self.retry.retry_backoff_ms = n;
        }
        if let Some(n) = env_parse("MAX_BACKOFF_MS") {
            self.retry.max_backoff_ms = n;
        }
        if let Some(n) = env_parse("BATCH_SIZE") {
            self.processing.batch_size = n;
        }
        if let Some(n) = env_parse("BATCH_TIMEOUT_MS") {
            self.processing.batch_timeout_ms = n;
        }
        if let Some(n) = env_parse("POLL_INTERVAL_MS") {
            self.processing.poll_interval_ms = n;
        }
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.processing.log_level = val;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.connector_name.is_empty() {
            return Err(ConnectorError::config("connector_name cannot be empty"));
        }

        if self.retry.max_retries > 100 {
            return Err(ConnectorError::config("max_retries too high (max 100)"));
        }

        if self.retry.retry_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConnectorError::config(
                "retry_backoff_ms cannot exceed max_backoff_ms",
            ));
        }

        if self.processing.batch_size == 0 {
            return Err(ConnectorError::config("batch_size must be > 0"));
        }

        Ok(())
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connector_name: "default-connector".to_string(),
            retry: RetrySettings::default(),
            processing: ProcessingSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = ConnectorConfig::default();
        assert_eq!(config.connector_name, "default-connector");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.processing.batch_size, 1000);
        assert_eq!(config.processing.poll_interval_ms, 1000);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ConnectorConfig::default();
        assert!(config.validate().is_ok());

        config.connector_name = "".to_string();
        assert!(config.validate().is_err());

        config.connector_name = "tdengine".to_string();
        config.processing.batch_size = 0;
        assert!(config.validate().is_err());

        config.processing.batch_size = 10;
        config.retry.retry_backoff_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file_uses_section_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
connector_name = "tdengine-sink"

[processing]
batch_size = 50
"#
        )
        .unwrap();

        let config = ConnectorConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.connector_name, "tdengine-sink");
        assert_eq!(config.processing.batch_size, 50);
        assert_eq!(config.processing.poll_interval_ms, 1000);
        assert_eq!(config.retry.max_backoff_ms, 30000);
    }
}
