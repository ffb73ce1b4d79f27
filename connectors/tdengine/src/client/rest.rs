//! REST transport to taosAdapter.
//!
//! SQL goes to `POST /rest/sql[/{db}]` as the raw request body, schemaless
//! writes go to the InfluxDB and OpenTSDB compatible endpoints. The adapter is
//! stateless, so a connection only remembers the selected database.

use super::{Column, Connection, Credentials, Driver, QueryResult};
use crate::schemaless::{Precision, Protocol};
use crate::url::ConnectionUrl;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tdengine_connect_core::{ConnectorError, ConnectorResult};
use tracing::debug;
use url::Url;

const PROBE_SQL: &str = "SELECT SERVER_VERSION()";

/// Driver that opens REST connections over a shared HTTP client
#[derive(Debug, Clone)]
pub struct RestDriver {
    client: reqwest::Client,
}

impl RestDriver {
    pub fn new(request_timeout: Duration) -> ConnectorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| ConnectorError::fatal_with_source("Failed to build HTTP client", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Driver for RestDriver {
    async fn connect(
        &self,
        url: &ConnectionUrl,
        credentials: &Credentials,
    ) -> ConnectorResult<Box<dyn Connection>> {
        let connection = RestConnection {
            client: self.client.clone(),
            base: url.base().clone(),
            credentials: credentials.clone(),
            database: url.database().map(str::to_string),
            closed: false,
        };

        // the adapter keeps no session, so reachability and credentials are
        // only known after a round trip
        connection.post_sql(PROBE_SQL).await?;
        debug!("Connected to {}", url);
        Ok(Box::new(connection))
    }
}

/// One logical session with taosAdapter
#[derive(Debug)]
pub struct RestConnection {
    client: reqwest::Client,
    base: Url,
    credentials: Credentials,
    database: Option<String>,
    closed: bool,
}

impl RestConnection {
    fn ensure_open(&self) -> ConnectorResult<()> {
        if self.closed {
            return Err(ConnectorError::retryable("connection is closed"));
        }
        Ok(())
    }

    fn endpoint(&self, path: &str) -> ConnectorResult<Url> {
        self.base
            .join(path)
            .map_err(|e| ConnectorError::config(format!("invalid endpoint '{}': {}", path, e)))
    }

    fn require_database(&self) -> ConnectorResult<&str> {
        self.database
            .as_deref()
            .ok_or_else(|| ConnectorError::config("no database selected for schemaless write"))
    }

    async fn post_sql(&self, sql: &str) -> ConnectorResult<SqlResponse> {
        self.ensure_open()?;
        let path = match &self.database {
            Some(db) => format!("rest/sql/{}", db),
            None => "rest/sql".to_string(),
        };

        let response = self
            .client
            .post(self.endpoint(&path)?)
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .body(sql.to_string())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        parse_sql_response(status, &body)
    }
}

#[async_trait]
impl Connection for RestConnection {
    async fn execute(&mut self, sql: &str) -> ConnectorResult<bool> {
        let response = self.post_sql(sql).await?;
        Ok(response.has_result_set())
    }

    async fn query(&mut self, sql: &str) -> ConnectorResult<QueryResult> {
        let response = self.post_sql(sql).await?;
        Ok(response.into_query_result())
    }

    async fn select_database(&mut self, name: &str) -> ConnectorResult<()> {
        self.ensure_open()?;
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ConnectorError::config(format!(
                "invalid database name '{}'",
                name
            )));
        }
        self.database = Some(name.to_string());
        Ok(())
    }

    async fn write_schemaless(
        &mut self,
        lines: &[String],
        protocol: Protocol,
        precision: Precision,
    ) -> ConnectorResult<()> {
        self.ensure_open()?;
        if lines.is_empty() {
            return Ok(());
        }

        let db = self.require_database()?;
        let url = match protocol {
            Protocol::Line => {
                let mut url = self.endpoint("influxdb/v1/write")?;
                url.query_pairs_mut()
                    .append_pair("db", db)
                    .append_pair("precision", influx_precision(precision));
                url
            }
            Protocol::Telnet => self.endpoint(&format!("opentsdb/v1/put/telnet/{}", db))?,
            Protocol::Json => self.endpoint(&format!("opentsdb/v1/put/json/{}", db))?,
        };

        let body = match protocol {
            Protocol::Json => json_body(lines)?,
            Protocol::Line | Protocol::Telnet => lines.join("\n"),
        };

        let response = self
            .client
            .post(url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.map_err(transport_error)?;
        Err(status_error(status, &body))
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        self.closed = true;
        Ok(())
    }
}

/// Precision names of the InfluxDB compatible endpoint
fn influx_precision(precision: Precision) -> &'static str {
    match precision {
        Precision::Millis => "ms",
        Precision::Micros => "u",
        Precision::Nanos => "ns",
    }
}

/// Merge JSON documents into the single array the endpoint accepts
fn json_body(lines: &[String]) -> ConnectorResult<String> {
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        match serde_json::from_str::<Value>(line)
            .map_err(|e| ConnectorError::format(line.as_str(), e.to_string()))?
        {
            Value::Array(values) => items.extend(values),
            other => items.push(other),
        }
    }
    serde_json::to_string(&Value::Array(items))
        .map_err(|e| ConnectorError::Serialization(e.to_string()))
}

fn transport_error(e: reqwest::Error) -> ConnectorError {
    ConnectorError::retryable_with_source("request to taosAdapter failed", e)
}

fn status_error(status: StatusCode, body: &str) -> ConnectorError {
    let body = body.trim();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ConnectorError::Authentication(format!("{}: {}", status, body))
        }
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            ConnectorError::retryable(format!("taosAdapter returned {}: {}", status, body))
        }
        _ => ConnectorError::fatal(format!("taosAdapter returned {}: {}", status, body)),
    }
}

#[derive(Debug, Deserialize)]
struct SqlResponse {
    code: i64,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    column_meta: Vec<Vec<Value>>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

impl SqlResponse {
    /// Statements without a result set report a single `affected_rows` column
    fn has_result_set(&self) -> bool {
        !(self.column_meta.len() == 1
            && self.column_meta[0].first().and_then(Value::as_str) == Some("affected_rows"))
    }

    fn into_query_result(self) -> QueryResult {
        let columns = self
            .column_meta
            .iter()
            .map(|meta| {
                let name = meta.first().and_then(Value::as_str).unwrap_or_default();
                let type_name = match meta.get(1) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Column::new(name, type_name)
            })
            .collect();
        QueryResult::new(columns, self.data)
    }
}

fn parse_sql_response(status: StatusCode, body: &str) -> ConnectorResult<SqlResponse> {
    let parsed = match serde_json::from_str::<SqlResponse>(body) {
        Ok(parsed) => parsed,
        Err(_) if !status.is_success() => return Err(status_error(status, body)),
        Err(e) => {
            return Err(ConnectorError::Serialization(format!(
                "unexpected taosAdapter response: {}",
                e
            )))
        }
    };

    if parsed.code == 0 {
        return Ok(parsed);
    }

    let desc = parsed.desc.as_deref().unwrap_or("unknown error");
    let message = format!("[0x{:04x}] {}", parsed.code, desc);
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        || desc.to_ascii_lowercase().contains("authentication failure")
    {
        return Err(ConnectorError::Authentication(message));
    }
    if status.is_server_error() {
        return Err(ConnectorError::retryable(message));
    }
    Err(ConnectorError::fatal(message))
}
