//! Configuration for the TDengine connector

use crate::cache::validate_identifier;
use crate::client::Credentials;
use crate::offset::TimestampOffset;
use crate::schemaless::{Precision, Protocol};
use crate::url::ConnectionUrl;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tdengine_connect_core::{ConnectorConfig, ConnectorError, ConnectorResult, RetryPolicy};

/// Unified configuration: core settings at the root, connector settings
/// under `[tdengine]`
///
/// ```toml
/// connector_name = "tdengine-sink"
///
/// [processing]
/// batch_size = 500
///
/// [tdengine]
/// mode = "sink"
/// url = "jdbc:TAOS-RS://localhost:6041"
/// database = "power"
/// precision = "ns"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TDengineConnectorConfig {
    #[serde(flatten)]
    pub core: ConnectorConfig,

    pub tdengine: TDengineConfig,
}

impl TDengineConnectorConfig {
    /// Load from `CONFIG_FILE` when set, otherwise from the environment, then
    /// apply environment overrides
    pub fn load() -> ConnectorResult<Self> {
        let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
            Self::from_file(&config_file)?
        } else {
            Self::from_env()?
        };

        config.core.apply_env_overrides();
        config.tdengine.apply_env_overrides();

        Ok(config)
    }

    pub fn from_file(path: &str) -> ConnectorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::config(format!("Failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ConnectorError::config(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    pub fn from_env() -> ConnectorResult<Self> {
        Ok(Self {
            core: ConnectorConfig::from_env()?,
            tdengine: TDengineConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        self.core.validate()?;
        self.tdengine.validate()?;
        Ok(())
    }
}

/// Which side of the pipeline the connector runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Sink,
    Source,
}

impl FromStr for Mode {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sink" => Ok(Mode::Sink),
            "source" => Ok(Mode::Source),
            other => Err(ConnectorError::config(format!(
                "unknown mode '{}', expected sink or source",
                other
            ))),
        }
    }
}

/// What the sink does with a record the codec rejects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnInvalidRecord {
    #[default]
    Skip,
    Fail,
}

impl FromStr for OnInvalidRecord {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(OnInvalidRecord::Skip),
            "fail" => Ok(OnInvalidRecord::Fail),
            other => Err(ConnectorError::config(format!(
                "unknown on_invalid_record '{}', expected skip or fail",
                other
            ))),
        }
    }
}

/// Source table and the partition its offsets are stored under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub table: String,
    /// Defaults to the table name
    #[serde(default)]
    pub partition: Option<String>,
}

impl TableMapping {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            partition: None,
        }
    }

    pub fn partition(&self) -> &str {
        self.partition.as_deref().unwrap_or(&self.table)
    }

    /// Parse `table` or `table:partition`
    fn parse(entry: &str) -> Self {
        match entry.split_once(':') {
            Some((table, partition)) => Self {
                table: table.trim().to_string(),
                partition: Some(partition.trim().to_string()).filter(|p| !p.is_empty()),
            },
            None => Self::new(entry.trim()),
        }
    }
}

/// TDengine connection, codec and extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TDengineConfig {
    #[serde(default)]
    pub mode: Mode,

    /// `jdbc:TAOS://host:port[/db]` or one of the accepted variants
    pub url: String,

    /// Overrides the `user` URL parameter
    #[serde(default)]
    pub user: Option<String>,

    /// Overrides the `password` URL parameter
    #[serde(default)]
    pub password: Option<String>,

    /// Target database; falls back to the database in the URL
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default = "default_max_connection_attempts")]
    pub max_connection_attempts: u32,

    /// Fixed wait between connection attempts
    #[serde(default = "default_connection_backoff_ms")]
    pub connection_backoff_ms: u64,

    #[serde(default = "default_charset")]
    pub charset: String,

    #[serde(default)]
    pub protocol: Protocol,

    /// Timestamp unit of the data and of created databases
    #[serde(default = "default_precision")]
    pub precision: Precision,

    /// Start of extraction when no offset was committed yet
    #[serde(default)]
    pub initial_timestamp: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Source tables
    #[serde(default)]
    pub tables: Vec<TableMapping>,

    /// Topic of extracted records, `{{table}}`, `{{partition}}` and
    /// `{{database}}` are substituted
    #[serde(default = "default_topic_template")]
    pub topic_template: String,

    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,

    #[serde(default)]
    pub tag_columns: Vec<String>,

    #[serde(default = "default_measurement_template")]
    pub measurement_template: String,

    /// Where the source persists offsets; kept in memory when unset
    #[serde(default)]
    pub offset_file: Option<String>,

    #[serde(default)]
    pub on_invalid_record: OnInvalidRecord,
}

fn default_max_connection_attempts() -> u32 {
    3
}

fn default_connection_backoff_ms() -> u64 {
    5000
}

fn default_charset() -> String {
    "UTF-8".to_string()
}

fn default_precision() -> Precision {
    Precision::Millis
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_topic_template() -> String {
    "tdengine-{{table}}".to_string()
}

fn default_timestamp_column() -> String {
    "ts".to_string()
}

fn default_measurement_template() -> String {
    "{{table}}".to_string()
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    })
}

impl TDengineConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            mode: Mode::default(),
            url: url.into(),
            user: None,
            password: None,
            database: None,
            max_connection_attempts: default_max_connection_attempts(),
            connection_backoff_ms: default_connection_backoff_ms(),
            charset: default_charset(),
            protocol: Protocol::default(),
            precision: default_precision(),
            initial_timestamp: None,
            request_timeout_secs: default_request_timeout_secs(),
            tables: Vec::new(),
            topic_template: default_topic_template(),
            timestamp_column: default_timestamp_column(),
            tag_columns: Vec::new(),
            measurement_template: default_measurement_template(),
            offset_file: None,
            on_invalid_record: OnInvalidRecord::default(),
        }
    }

    /// Load from environment variables
    ///
    /// - `TDENGINE_URL`: required connection URL
    /// - `TDENGINE_MODE`: `sink` (default) or `source`
    /// - `TDENGINE_TABLES`: comma separated `table[:partition]` entries
    /// - `TDENGINE_TAG_COLUMNS`: comma separated column names
    ///
    /// Every other field maps to `TDENGINE_<FIELD>` in upper case.
    pub fn from_env() -> ConnectorResult<Self> {
        let url = env::var("TDENGINE_URL")
            .map_err(|_| ConnectorError::config("TDENGINE_URL is required"))?;
        let mut config = Self::new(url);
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("TDENGINE_URL") {
            self.url = val;
        }
        if let Some(mode) = env_parse("TDENGINE_MODE") {
            self.mode = mode;
        }
        if let Ok(val) = env::var("TDENGINE_USER") {
            self.user = Some(val);
        }
        if let Ok(val) = env::var("TDENGINE_PASSWORD") {
            self.password = Some(val);
        }
        if let Ok(val) = env::var("TDENGINE_DATABASE") {
            self.database = Some(val);
        }
        if let Some(n) = env_parse("TDENGINE_MAX_CONNECTION_ATTEMPTS") {
            self.max_connection_attempts = n;
        }
        if let Some(n) = env_parse("TDENGINE_CONNECTION_BACKOFF_MS") {
            self.connection_backoff_ms = n;
        }
        if let Ok(val) = env::var("TDENGINE_CHARSET") {
            self.charset = val;
        }
        if let Some(protocol) = env_parse("TDENGINE_PROTOCOL") {
            self.protocol = protocol;
        }
        if let Some(precision) = env_parse("TDENGINE_PRECISION") {
            self.precision = precision;
        }
        if let Ok(val) = env::var("TDENGINE_INITIAL_TIMESTAMP") {
            self.initial_timestamp = Some(val);
        }
        if let Some(n) = env_parse("TDENGINE_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = n;
        }
        if let Some(tables) = env_list("TDENGINE_TABLES") {
            self.tables = tables.iter().map(|t| TableMapping::parse(t)).collect();
        }
        if let Ok(val) = env::var("TDENGINE_TOPIC_TEMPLATE") {
            self.topic_template = val;
        }
        if let Ok(val) = env::var("TDENGINE_TIMESTAMP_COLUMN") {
            self.timestamp_column = val;
        }
        if let Some(columns) = env_list("TDENGINE_TAG_COLUMNS") {
            self.tag_columns = columns;
        }
        if let Ok(val) = env::var("TDENGINE_MEASUREMENT_TEMPLATE") {
            self.measurement_template = val;
        }
        if let Ok(val) = env::var("TDENGINE_OFFSET_FILE") {
            self.offset_file = Some(val);
        }
        if let Some(policy) = env_parse("TDENGINE_ON_INVALID_RECORD") {
            self.on_invalid_record = policy;
        }
    }

    /// Checks run before any connection attempt
    pub fn validate(&self) -> ConnectorResult<()> {
        let url = self.connection_url()?;

        let charset = self.charset.trim().to_ascii_uppercase().replace('_', "-");
        if charset != "UTF-8" && charset != "UTF8" {
            return Err(ConnectorError::config(format!(
                "unsupported charset '{}', only UTF-8 is supported",
                self.charset
            )));
        }

        self.retry_policy()?;

        if let Some(db) = self.database.as_deref().or(url.database()) {
            validate_identifier(db)?;
        }

        match self.mode {
            Mode::Sink => {
                if self.database.is_none() && url.database().is_none() {
                    return Err(ConnectorError::config(
                        "sink mode needs a database, set database or add it to the url",
                    ));
                }
            }
            Mode::Source => {
                if self.tables.is_empty() {
                    return Err(ConnectorError::config(
                        "source mode needs at least one entry in tables",
                    ));
                }
                for mapping in &self.tables {
                    for part in mapping.table.split('.') {
                        validate_identifier(part)?;
                    }
                    if mapping.partition().is_empty() {
                        return Err(ConnectorError::config("partition cannot be empty"));
                    }
                }
                let mut partitions: Vec<&str> = self.tables.iter().map(|m| m.partition()).collect();
                partitions.sort_unstable();
                if partitions.windows(2).any(|w| w[0] == w[1]) {
                    return Err(ConnectorError::config("partitions must be unique"));
                }
                validate_identifier(&self.timestamp_column)?;
                TimestampOffset::parse_initial(self.initial_timestamp.as_deref())?;
            }
        }

        if self.request_timeout_secs == 0 {
            return Err(ConnectorError::config("request_timeout_secs must be > 0"));
        }

        Ok(())
    }

    pub fn connection_url(&self) -> ConnectorResult<ConnectionUrl> {
        ConnectionUrl::parse(&self.url)
    }

    pub fn credentials(&self, url: &ConnectionUrl) -> Credentials {
        Credentials::resolve(url, self.user.as_deref(), self.password.as_deref())
    }

    pub fn retry_policy(&self) -> ConnectorResult<RetryPolicy> {
        RetryPolicy::new(
            self.max_connection_attempts,
            Duration::from_millis(self.connection_backoff_ms),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Configured database, or the one named in the URL
    pub fn target_database(&self) -> Option<String> {
        self.database.clone().or_else(|| {
            ConnectionUrl::parse(&self.url)
                .ok()
                .and_then(|u| u.database().map(str::to_string))
        })
    }
}
