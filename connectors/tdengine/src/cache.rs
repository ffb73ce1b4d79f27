//! Connection Cache: one lazily opened, validated and reopened connection.

use crate::client::{Connection, QueryResult};
use crate::provider::ConnectionProvider;
use crate::schemaless::{Precision, Protocol};
use tdengine_connect_core::{ConnectorError, ConnectorMetrics, ConnectorResult};
use thiserror::Error;
use tracing::{debug, info, warn};

const PROBE_SQL: &str = "SELECT SERVER_VERSION()";

/// Lifecycle of the cached connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The provider gave up; the next access tries again
    Failed,
}

/// Probe failure; always turned into a reconnect
#[derive(Debug, Error)]
#[error("connection is no longer valid: {0}")]
struct ValidityError(ConnectorError);

/// Owns at most one live connection and hands it out after a validity probe
pub struct ConnectionCache {
    provider: ConnectionProvider,
    connection: Option<Box<dyn Connection>>,
    state: ConnectionState,
    database: Option<String>,
    precision: Precision,
    metrics: Option<ConnectorMetrics>,
}

impl ConnectionCache {
    /// `precision` is used when the cache creates the database
    pub fn new(provider: ConnectionProvider, precision: Precision) -> Self {
        Self {
            provider,
            connection: None,
            state: ConnectionState::Disconnected,
            database: None,
            precision,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ConnectorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// A validated connection, opening or reopening one when needed
    pub async fn get_connection(&mut self) -> ConnectorResult<&mut dyn Connection> {
        let valid = match self.connection.as_mut() {
            Some(connection) => match probe(connection.as_mut()).await {
                Ok(()) => true,
                Err(e) => {
                    debug!("{}, reconnecting", e);
                    false
                }
            },
            None => false,
        };

        if !valid {
            self.reconnect().await?;
        }

        match self.connection.as_deref_mut() {
            Some(connection) => Ok(connection),
            None => Err(ConnectorError::fatal("no connection after reconnect")),
        }
    }

    /// Create the database if needed and make it the default one
    ///
    /// The name is remembered and selected again after every reconnect.
    pub async fn set_database(&mut self, name: &str) -> ConnectorResult<()> {
        validate_identifier(name)?;
        let precision = self.precision;
        let connection = self.get_connection().await?;
        apply_database(connection, name, precision).await?;

        if self.database.as_deref() != Some(name) {
            info!(database = name, "Using database");
            self.database = Some(name.to_string());
        }
        Ok(())
    }

    /// Run a statement; `true` when it produced a result set
    pub async fn execute(&mut self, sql: &str) -> ConnectorResult<bool> {
        let connection = self.get_connection().await?;
        connection
            .execute(sql)
            .await
            .map_err(|e| ConnectorError::statement(sql, e))
    }

    pub async fn query(&mut self, sql: &str) -> ConnectorResult<QueryResult> {
        let connection = self.get_connection().await?;
        connection
            .query(sql)
            .await
            .map_err(|e| ConnectorError::statement(sql, e))
    }

    /// Schemaless bulk write; a failure names the first line of the batch
    pub async fn write_lines(
        &mut self,
        lines: &[String],
        protocol: Protocol,
        precision: Precision,
    ) -> ConnectorResult<()> {
        let Some(first) = lines.first() else {
            return Ok(());
        };

        let connection = self.get_connection().await?;
        connection
            .write_schemaless(lines, protocol, precision)
            .await
            .map_err(|e| {
                ConnectorError::statement(
                    format!("schemaless write of {} line(s) starting with `{}`", lines.len(), first),
                    e,
                )
            })
    }

    /// Release the connection; safe to call any number of times
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                warn!("Error while closing connection: {}", e);
            }
            info!("Connection to {} closed", self.provider.url());
        }
        self.state = ConnectionState::Disconnected;
    }

    async fn reconnect(&mut self) -> ConnectorResult<()> {
        let replacing = self.connection.is_some();
        self.close().await;
        self.state = ConnectionState::Connecting;

        let mut connection = match self.provider.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                self.state = ConnectionState::Failed;
                return Err(e);
            }
        };

        if let Some(db) = &self.database {
            if let Err(e) = apply_database(connection.as_mut(), db, self.precision).await {
                if let Err(close_err) = connection.close().await {
                    warn!("Error while closing half-initialized connection: {}", close_err);
                }
                self.state = ConnectionState::Failed;
                return Err(e);
            }
        }

        if replacing {
            info!("Reconnected to {}", self.provider.url());
            if let Some(metrics) = &self.metrics {
                metrics.record_reconnect();
            }
        }
        self.connection = Some(connection);
        self.state = ConnectionState::Connected;
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("provider", &self.provider)
            .field("state", &self.state)
            .field("database", &self.database)
            .field("precision", &self.precision)
            .finish()
    }
}

async fn probe(connection: &mut dyn Connection) -> Result<(), ValidityError> {
    connection
        .query(PROBE_SQL)
        .await
        .map(|_| ())
        .map_err(ValidityError)
}

async fn apply_database(
    connection: &mut dyn Connection,
    name: &str,
    precision: Precision,
) -> ConnectorResult<()> {
    let sql = format!(
        "CREATE DATABASE IF NOT EXISTS {} PRECISION '{}'",
        name, precision
    );
    connection
        .execute(&sql)
        .await
        .map_err(|e| ConnectorError::statement(&sql, e))?;
    connection
        .select_database(name)
        .await
        .map_err(|e| ConnectorError::statement(format!("USE {}", name), e))
}

/// Database and table names are spliced into SQL, so only plain identifiers pass
pub(crate) fn validate_identifier(name: &str) -> ConnectorResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(ConnectorError::config(format!(
            "invalid identifier '{}': expected letters, digits and '_'",
            name
        )));
    }
    Ok(())
}
