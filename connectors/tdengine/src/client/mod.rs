//! Connection seam between the connector and the database.
//!
//! [`Driver`] opens connections, [`Connection`] runs statements and
//! schemaless writes on one of them. Production uses the REST driver; tests
//! plug in fakes.

#[cfg(test)]
pub(crate) mod fake;
mod rest;

pub use rest::{RestConnection, RestDriver};

use crate::schemaless::{Precision, Protocol};
use crate::url::ConnectionUrl;
use async_trait::async_trait;
use serde_json::Value;
use tdengine_connect_core::ConnectorResult;

pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_PASSWORD: &str = "taosdata";

/// User and password presented to the server
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Explicit values win over the ones embedded in the URL
    pub fn resolve(url: &ConnectionUrl, user: Option<&str>, password: Option<&str>) -> Self {
        Self::new(
            user.or(url.user()).unwrap_or(DEFAULT_USER),
            password.or(url.password()).unwrap_or(DEFAULT_PASSWORD),
        )
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(DEFAULT_USER, DEFAULT_PASSWORD)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Column of a result set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_name: String,
}

impl Column {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Rows returned by a query, values in column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An open session with the database
#[async_trait]
pub trait Connection: Send {
    /// Run a statement; `true` when it produced a result set
    async fn execute(&mut self, sql: &str) -> ConnectorResult<bool>;

    /// Run a query and collect its rows
    async fn query(&mut self, sql: &str) -> ConnectorResult<QueryResult>;

    /// Make `name` the default database of later statements
    async fn select_database(&mut self, name: &str) -> ConnectorResult<()>;

    /// Bulk insert through the schemaless endpoint
    async fn write_schemaless(
        &mut self,
        lines: &[String],
        protocol: Protocol,
        precision: Precision,
    ) -> ConnectorResult<()>;

    async fn close(&mut self) -> ConnectorResult<()>;
}

/// Opens connections for a URL
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Driver: Send + Sync {
    async fn connect(
        &self,
        url: &ConnectionUrl,
        credentials: &Credentials,
    ) -> ConnectorResult<Box<dyn Connection>>;
}
