//! In-memory driver for connector tests.

use super::{Column, Connection, Credentials, Driver, QueryResult};
use crate::schemaless::{Precision, Protocol};
use crate::url::ConnectionUrl;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tdengine_connect_core::{ConnectorError, ConnectorResult};

/// Rows of a table keyed by their integer timestamp
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeTable {
    pub columns: Vec<Column>,
    pub rows: Vec<(i64, Vec<Value>)>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeServer {
    pub connects: u32,
    pub statements: Vec<String>,
    pub writes: Vec<(Vec<String>, Protocol, Precision)>,
    /// Number of upcoming schemaless writes failing with a transient error
    pub failing_writes: u32,
    pub tables: HashMap<String, FakeTable>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDriver {
    pub server: Arc<Mutex<FakeServer>>,
}

impl FakeDriver {
    pub fn add_table(&self, name: &str, columns: Vec<Column>, rows: Vec<(i64, Vec<Value>)>) {
        self.server
            .lock()
            .unwrap()
            .tables
            .insert(name.to_string(), FakeTable { columns, rows });
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.server
            .lock()
            .unwrap()
            .writes
            .iter()
            .flat_map(|(lines, _, _)| lines.clone())
            .collect()
    }
}

struct FakeConnection {
    server: Arc<Mutex<FakeServer>>,
}

#[async_trait]
impl Driver for FakeDriver {
    async fn connect(
        &self,
        _url: &ConnectionUrl,
        _credentials: &Credentials,
    ) -> ConnectorResult<Box<dyn Connection>> {
        self.server.lock().unwrap().connects += 1;
        Ok(Box::new(FakeConnection {
            server: self.server.clone(),
        }))
    }
}

/// Token following `keyword` in `sql`
fn after<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let mut tokens = sql.split_whitespace();
    tokens.find(|t| t.eq_ignore_ascii_case(keyword))?;
    tokens.next()
}

#[async_trait]
impl Connection for FakeConnection {
    async fn execute(&mut self, sql: &str) -> ConnectorResult<bool> {
        self.server.lock().unwrap().statements.push(sql.to_string());
        Ok(false)
    }

    /// Understands `... FROM <table> WHERE <ts> > <n> ... LIMIT <k>` and `WHERE <ts> = <n>`
    async fn query(&mut self, sql: &str) -> ConnectorResult<QueryResult> {
        let mut server = self.server.lock().unwrap();
        server.statements.push(sql.to_string());

        let Some(table) = after(sql, "FROM") else {
            return Ok(QueryResult::default());
        };
        let table = server
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| ConnectorError::fatal(format!("Table does not exist: {}", table)))?;
        let lower: i64 = after(sql, ">").and_then(|v| v.parse().ok()).unwrap_or(i64::MIN);
        let exact: Option<i64> = after(sql, "=").and_then(|v| v.parse().ok());
        let limit: usize = after(sql, "LIMIT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(usize::MAX);

        let mut columns = table.columns.clone();
        columns.push(Column::new(crate::mapping::CURSOR_COLUMN, "BIGINT"));

        let mut rows: Vec<_> = table
            .rows
            .into_iter()
            .filter(|(ts, _)| *ts > lower && exact.map_or(true, |at| *ts == at))
            .collect();
        rows.sort_by_key(|(ts, _)| *ts);
        let rows = rows
            .into_iter()
            .take(limit)
            .map(|(ts, mut values)| {
                values.push(Value::from(ts));
                values
            })
            .collect();

        Ok(QueryResult::new(columns, rows))
    }

    async fn select_database(&mut self, name: &str) -> ConnectorResult<()> {
        self.server
            .lock()
            .unwrap()
            .statements
            .push(format!("USE {}", name));
        Ok(())
    }

    async fn write_schemaless(
        &mut self,
        lines: &[String],
        protocol: Protocol,
        precision: Precision,
    ) -> ConnectorResult<()> {
        let mut server = self.server.lock().unwrap();
        if server.failing_writes > 0 {
            server.failing_writes -= 1;
            return Err(ConnectorError::retryable("write timed out"));
        }
        server.writes.push((lines.to_vec(), protocol, precision));
        Ok(())
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        Ok(())
    }
}
