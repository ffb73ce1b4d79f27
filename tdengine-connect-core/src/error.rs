//! Error types shared by the runtime and connectors.

use thiserror::Error;

/// Result type alias for connector operations
pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in connector operations
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Connection could not be established after exhausting the retry policy
    #[error("connection failed after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: Box<ConnectorError>,
    },

    /// A schemaless line could not be parsed or a record lacked mandatory parts
    #[error("invalid line `{line}`: {reason}")]
    Format { line: String, reason: String },

    /// Invalid configuration, detected before any connection attempt
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credentials were rejected by the backing store
    #[error("authentication error: {0}")]
    Authentication(String),

    /// A statement failed on an established connection
    #[error("statement failed: {sql}: {source}")]
    Statement {
        sql: String,
        #[source]
        source: Box<ConnectorError>,
    },

    /// Transient error that may succeed on retry
    #[error("retryable error: {message}")]
    Retryable {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Unrecoverable error
    #[error("fatal error: {message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Payload could not be interpreted; the record is skipped by the runtime
    #[error("invalid data: {message}")]
    InvalidData { message: String, payload: Vec<u8> },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal {
            message: msg.into(),
            source: None,
        }
    }

    pub fn fatal_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fatal {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable {
            message: msg.into(),
            source: None,
        }
    }

    pub fn retryable_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Retryable {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a format error for a schemaless line
    pub fn format(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Format {
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an error raised while running `sql`
    pub fn statement(sql: impl Into<String>, source: ConnectorError) -> Self {
        Self::Statement {
            sql: sql.into(),
            source: Box::new(source),
        }
    }

    /// Whether the operation may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Retryable { .. } | Self::Io(_) => true,
            Self::Statement { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether the error is tied to one record rather than the connector
    pub fn is_invalid_data(&self) -> bool {
        matches!(self, Self::InvalidData { .. } | Self::Format { .. })
    }
}
