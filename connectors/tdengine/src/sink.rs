//! Sink: writes schemaless records into TDengine.
//!
//! Line protocol payloads are parsed and re-encoded, so malformed lines are
//! rejected per record before they can fail a whole batch on the server.
//! Telnet and JSON payloads get a structural check and pass through as is.

use crate::cache::ConnectionCache;
use crate::client::{Driver, RestDriver};
use crate::config::{OnInvalidRecord, TDengineConfig};
use crate::provider::ConnectionProvider;
use crate::schemaless::{self, Protocol};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tdengine_connect_core::{
    ConnectorConfig, ConnectorError, ConnectorMetrics, ConnectorResult, SinkConnector, SinkRecord,
};
use tracing::{debug, info, warn};

pub struct TDengineSinkConnector {
    config: TDengineConfig,
    driver: Arc<dyn Driver>,
    cache: Option<ConnectionCache>,
    buffer: Vec<String>,
    batch_size: usize,
}

impl TDengineSinkConnector {
    /// Connector talking to taosAdapter over REST
    pub fn with_config(config: TDengineConfig) -> ConnectorResult<Self> {
        let driver = RestDriver::new(config.request_timeout())?;
        Ok(Self::with_driver(config, Arc::new(driver)))
    }

    pub fn with_driver(config: TDengineConfig, driver: Arc<dyn Driver>) -> Self {
        Self {
            config,
            driver,
            cache: None,
            buffer: Vec::new(),
            batch_size: 1,
        }
    }

    /// Lines waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn cache(&mut self) -> ConnectorResult<&mut ConnectionCache> {
        self.cache
            .as_mut()
            .ok_or_else(|| ConnectorError::fatal("sink connector is not initialized"))
    }

    /// Validated lines of one record
    fn normalize(&self, payload: &str) -> ConnectorResult<Vec<String>> {
        match self.config.protocol {
            Protocol::Line => payload
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| {
                    let point = schemaless::decode(line, Some(self.config.precision))?;
                    schemaless::encode(&point)
                })
                .collect(),
            Protocol::Telnet => payload
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| check_telnet(line).map(|_| line.to_string()))
                .collect(),
            Protocol::Json => {
                let doc = payload.trim();
                serde_json::from_str::<Value>(doc)
                    .map_err(|e| ConnectorError::format(doc, e.to_string()))?;
                Ok(vec![doc.to_string()])
            }
        }
    }

    async fn write_buffer(&mut self) -> ConnectorResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let protocol = self.config.protocol;
        let precision = self.config.precision;
        let lines = std::mem::take(&mut self.buffer);
        let result = match self.cache() {
            Ok(cache) => cache.write_lines(&lines, protocol, precision).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!("Wrote {} line(s) to TDengine", lines.len());
                Ok(())
            }
            Err(e) => {
                // keep the batch for the next attempt
                self.buffer = lines;
                Err(e)
            }
        }
    }
}

/// `<metric> <timestamp> <value> <tagk>=<tagv> ...`
fn check_telnet(line: &str) -> ConnectorResult<()> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(ConnectorError::format(
            line,
            "expected metric, timestamp, value and at least one tag",
        ));
    }
    if parts[1].parse::<i64>().is_err() {
        return Err(ConnectorError::format(line, "timestamp is not an integer"));
    }
    if let Some(tag) = parts[3..].iter().find(|t| !t.contains('=')) {
        return Err(ConnectorError::format(line, format!("tag '{}' has no '='", tag)));
    }
    Ok(())
}

#[async_trait]
impl SinkConnector for TDengineSinkConnector {
    async fn initialize(&mut self, config: ConnectorConfig) -> ConnectorResult<()> {
        info!("Initializing TDengine sink connector");
        self.config.validate()?;
        self.batch_size = config.processing.batch_size.max(1);

        let url = self.config.connection_url()?;
        let credentials = self.config.credentials(&url);
        let provider = ConnectionProvider::new(
            self.driver.clone(),
            url,
            credentials,
            self.config.retry_policy()?,
        );
        let mut cache = ConnectionCache::new(provider, self.config.precision)
            .with_metrics(ConnectorMetrics::new(&config.connector_name, "sink"));

        let database = self
            .config
            .target_database()
            .ok_or_else(|| ConnectorError::config("sink mode needs a database"))?;
        cache.set_database(&database).await?;

        info!(
            protocol = self.config.protocol.as_str(),
            precision = %self.config.precision,
            batch_size = self.batch_size,
            "Writing to database {}", database
        );
        self.cache = Some(cache);
        Ok(())
    }

    async fn process(&mut self, record: SinkRecord) -> ConnectorResult<()> {
        // a full buffer is written before the record is taken, so a retried
        // call never buffers the same record twice
        if self.buffer.len() >= self.batch_size {
            self.write_buffer().await?;
        }

        let lines = match record.payload_str().and_then(|p| self.normalize(p)) {
            Ok(lines) => lines,
            Err(e) if e.is_invalid_data() => match self.config.on_invalid_record {
                OnInvalidRecord::Skip => return Err(e),
                OnInvalidRecord::Fail => {
                    return Err(ConnectorError::fatal_with_source(
                        format!(
                            "invalid record at {}:{}",
                            record.topic(),
                            record.offset()
                        ),
                        e,
                    ))
                }
            },
            Err(e) => return Err(e),
        };

        debug!(
            "Buffered {} line(s) from {}:{}",
            lines.len(),
            record.topic(),
            record.offset()
        );
        self.buffer.extend(lines);
        Ok(())
    }

    async fn flush(&mut self) -> ConnectorResult<()> {
        self.write_buffer().await
    }

    async fn shutdown(&mut self) -> ConnectorResult<()> {
        if !self.buffer.is_empty() {
            warn!("Dropping {} unwritten line(s) on shutdown", self.buffer.len());
            self.buffer.clear();
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.close().await;
        }
        info!("TDengine sink connector stopped");
        Ok(())
    }
}
