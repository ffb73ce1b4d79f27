//! Sink and source connectors driven by the runtimes over an in-memory database.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tdengine_connect_core::{
    ChannelEmitter, ChannelStream, ConnectorConfig, ConnectorResult, MemoryOffsetStore, SinkRecord,
    SinkRuntime, SourceRuntime,
};
use tdengine_connector::client::Column;
use tdengine_connector::config::TableMapping;
use tdengine_connector::mapping::CURSOR_COLUMN;
use tdengine_connector::offset::{TIMESTAMP_MS_KEY, TIMESTAMP_NS_KEY};
use tdengine_connector::{
    Connection, ConnectionUrl, Credentials, Driver, Mode, Precision, Protocol, QueryResult,
    TDengineConfig, TDengineSinkConnector, TDengineSourceConnector,
};
use tokio::sync::mpsc;

#[derive(Default)]
struct Database {
    statements: Vec<String>,
    lines: Vec<String>,
    /// table -> (timestamp in ns, row values)
    tables: HashMap<String, Vec<(i64, Vec<Value>)>>,
}

#[derive(Clone, Default)]
struct MemoryDriver {
    db: Arc<Mutex<Database>>,
}

struct MemoryConnection {
    db: Arc<Mutex<Database>>,
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn connect(
        &self,
        _url: &ConnectionUrl,
        _credentials: &Credentials,
    ) -> ConnectorResult<Box<dyn Connection>> {
        Ok(Box::new(MemoryConnection {
            db: self.db.clone(),
        }))
    }
}

fn token_after<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let mut tokens = sql.split_whitespace();
    tokens.find(|t| *t == keyword)?;
    tokens.next()
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, sql: &str) -> ConnectorResult<bool> {
        self.db.lock().unwrap().statements.push(sql.to_string());
        Ok(false)
    }

    async fn query(&mut self, sql: &str) -> ConnectorResult<QueryResult> {
        let db = self.db.lock().unwrap();
        let Some(rows) = token_after(sql, "FROM").and_then(|t| db.tables.get(t)) else {
            return Ok(QueryResult::default());
        };
        let after: i64 = token_after(sql, ">").unwrap().parse().unwrap();
        let limit: usize = token_after(sql, "LIMIT").unwrap().parse().unwrap();

        let rows = rows
            .iter()
            .filter(|(ts, _)| *ts > after)
            .take(limit)
            .map(|(ts, values)| {
                let mut values = values.clone();
                values.push(json!(ts));
                values
            })
            .collect();
        let columns = vec![
            Column::new("ts", "TIMESTAMP"),
            Column::new("voltage", "INT"),
            Column::new("location", "NCHAR"),
            Column::new(CURSOR_COLUMN, "BIGINT"),
        ];
        Ok(QueryResult::new(columns, rows))
    }

    async fn select_database(&mut self, name: &str) -> ConnectorResult<()> {
        self.db.lock().unwrap().statements.push(format!("USE {}", name));
        Ok(())
    }

    async fn write_schemaless(
        &mut self,
        lines: &[String],
        protocol: Protocol,
        precision: Precision,
    ) -> ConnectorResult<()> {
        assert_eq!(protocol, Protocol::Line);
        assert_eq!(precision, Precision::Nanos);
        self.db.lock().unwrap().lines.extend_from_slice(lines);
        Ok(())
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        Ok(())
    }
}

fn tdengine_config(mode: Mode) -> TDengineConfig {
    let mut config = TDengineConfig::new("jdbc:TAOS-RS://localhost:6041/power?user=root&password=taosdata");
    config.mode = mode;
    config.precision = Precision::Nanos;
    config.connection_backoff_ms = 1;
    config
}

#[tokio::test]
async fn test_sink_writes_normalized_lines() {
    let driver = MemoryDriver::default();
    let connector = TDengineSinkConnector::with_driver(
        tdengine_config(Mode::Sink),
        Arc::new(driver.clone()),
    );

    let (tx, rx) = mpsc::channel(16);
    let mut core = ConnectorConfig::default();
    core.processing.batch_size = 2;
    let mut runtime = SinkRuntime::new(connector, ChannelStream::new(rx), core).unwrap();

    let payloads = [
        "st,t1=3i64 c1=3i64,c2=F 1626006833639000000",
        "st,t1=4i64 c1=4i64 garbage",
        "st,t1=5i64 c1=5i64,c2=true 1626006833639000001",
        "st,t1=6i64 c1=6i64 1626006833639000002",
    ];
    for (i, payload) in payloads.iter().enumerate() {
        tx.send(SinkRecord::new("meters", i as u64, payload.as_bytes().to_vec()))
            .await
            .unwrap();
    }
    drop(tx);

    runtime.run().await.unwrap();

    let db = driver.db.lock().unwrap();
    assert_eq!(
        db.statements[..2],
        [
            "CREATE DATABASE IF NOT EXISTS power PRECISION 'ns'".to_string(),
            "USE power".to_string(),
        ]
    );
    assert_eq!(
        db.lines,
        vec![
            "st,t1=3i64 c1=3i64,c2=false 1626006833639000000",
            "st,t1=5i64 c1=5i64,c2=true 1626006833639000001",
            "st,t1=6i64 c1=6i64 1626006833639000002",
        ]
    );
}

#[tokio::test]
async fn test_source_emits_rows_and_persists_offsets() {
    let driver = MemoryDriver::default();
    driver.db.lock().unwrap().tables.insert(
        "d1001".to_string(),
        vec![
            (1_626_006_833_639_000_001, vec![json!("2021-07-11T12:33:53.639000001Z"), json!(219), json!("SF")]),
            (1_626_006_833_640_000_000, vec![json!("2021-07-11T12:33:53.640Z"), json!(220), json!("SF")]),
        ],
    );

    let mut config = tdengine_config(Mode::Source);
    config.tables = vec![TableMapping::new("d1001")];
    config.tag_columns = vec!["location".to_string()];
    config.initial_timestamp = Some("0".to_string());
    let connector = TDengineSourceConnector::with_driver(config, Arc::new(driver.clone()));

    let mut core = ConnectorConfig::default();
    core.processing.poll_interval_ms = 10;

    let (tx, mut rx) = mpsc::channel(16);
    let mut runtime =
        SourceRuntime::new(connector, ChannelEmitter::new(tx), MemoryOffsetStore::new(), core)
            .unwrap();
    let shutdown = runtime.shutdown_handle();
    let task = tokio::spawn(async move {
        let result = runtime.run().await;
        (runtime, result)
    });

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.topic, "tdengine-d1001");
    assert_eq!(
        first.payload_str().unwrap(),
        r#"d1001,location=L"SF" voltage=219i64 1626006833639000001"#
    );
    assert_eq!(
        second.payload_str().unwrap(),
        r#"d1001,location=L"SF" voltage=220i64 1626006833640000000"#
    );

    // no duplicates once the batch was committed
    assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv())
        .await
        .is_err());

    shutdown.shutdown();
    let (runtime, result) = task.await.unwrap();
    result.unwrap();

    let offset = runtime.offset_store().get("d1001").unwrap();
    assert_eq!(offset.get(TIMESTAMP_MS_KEY), Some(1_626_006_833_640));
    assert_eq!(offset.get(TIMESTAMP_NS_KEY), Some(0));
}
