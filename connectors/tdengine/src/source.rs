//! Source: incremental extraction of rows newer than the committed offset.
//!
//! Every configured table is queried in timestamp order starting strictly
//! after its partition's cursor. Rows are turned into schemaless lines by a
//! [`RowMapper`]; each record carries the offset reached once it is emitted,
//! and cursors only move when the runtime commits those offsets.

use crate::cache::ConnectionCache;
use crate::client::{Driver, QueryResult, RestDriver};
use crate::config::{TDengineConfig, TableMapping};
use crate::mapping::{ColumnMapper, RowContext, RowMapper, CURSOR_COLUMN};
use crate::offset::{OffsetTracker, TimestampOffset};
use crate::provider::ConnectionProvider;
use crate::schemaless::{encode, replace_placeholders, Precision};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tdengine_connect_core::{
    ConnectorConfig, ConnectorError, ConnectorMetrics, ConnectorResult, Offset, SourceConnector,
    SourceRecord,
};
use tracing::{debug, info, warn};

pub struct TDengineSourceConnector {
    config: TDengineConfig,
    driver: Arc<dyn Driver>,
    mapper: Box<dyn RowMapper>,
    cache: Option<ConnectionCache>,
    trackers: HashMap<String, OffsetTracker>,
    /// Cursor of partitions without a committed offset
    start: TimestampOffset,
    batch_size: usize,
    metrics: Option<ConnectorMetrics>,
}

impl TDengineSourceConnector {
    /// Connector talking to taosAdapter over REST
    pub fn with_config(config: TDengineConfig) -> ConnectorResult<Self> {
        let driver = RestDriver::new(config.request_timeout())?;
        Ok(Self::with_driver(config, Arc::new(driver)))
    }

    pub fn with_driver(config: TDengineConfig, driver: Arc<dyn Driver>) -> Self {
        let mapper = ColumnMapper::new(
            config.timestamp_column.clone(),
            config.tag_columns.clone(),
            config.measurement_template.clone(),
        );
        Self {
            config,
            driver,
            mapper: Box::new(mapper),
            cache: None,
            trackers: HashMap::new(),
            start: TimestampOffset::default(),
            batch_size: 1000,
            metrics: None,
        }
    }

    /// Replace the default column mapping
    pub fn with_mapper(mut self, mapper: Box<dyn RowMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// Precision timestamps are read and emitted in
    pub fn precision(&self) -> Precision {
        self.config.precision
    }

    /// Committed cursor of a partition
    pub fn position(&self, partition: &str) -> Option<TimestampOffset> {
        self.trackers.get(partition).map(OffsetTracker::current)
    }

    fn topic(&self, mapping: &TableMapping) -> String {
        let values = HashMap::from([
            ("table".to_string(), mapping.table.clone()),
            ("partition".to_string(), mapping.partition().to_string()),
            (
                "database".to_string(),
                self.config.target_database().unwrap_or_default(),
            ),
        ]);
        replace_placeholders(&self.config.topic_template, &values)
    }

    fn cache(&mut self) -> ConnectorResult<&mut ConnectionCache> {
        self.cache
            .as_mut()
            .ok_or_else(|| ConnectorError::fatal("source connector is not initialized"))
    }

    fn row_cursors(
        &self,
        mapping: &TableMapping,
        partition: &str,
        result: &QueryResult,
    ) -> ConnectorResult<Vec<i64>> {
        let ctx = RowContext {
            table: &mapping.table,
            partition,
            columns: &result.columns,
            precision: self.config.precision,
        };
        result
            .rows
            .iter()
            .map(|row| self.mapper.cursor(&ctx, row))
            .collect()
    }

    async fn poll_table(&mut self, mapping: &TableMapping) -> ConnectorResult<Vec<SourceRecord>> {
        let partition = mapping.partition().to_string();
        let precision = self.config.precision;
        let start = self.start;
        let position = self
            .trackers
            .entry(partition.clone())
            .or_insert_with(|| OffsetTracker::new(partition.clone(), start))
            .current();

        let sql = extraction_query(
            &mapping.table,
            &self.config.timestamp_column,
            position.to_precision(precision),
            self.batch_size,
        );
        let mut result = self.cache()?.query(&sql).await?;
        if result.is_empty() {
            return Ok(Vec::new());
        }

        let mut cursors = self.row_cursors(mapping, &partition, &result)?;
        let mut keep = complete_prefix(&cursors, self.batch_size);
        if keep == cursors.len() && cursors.len() >= self.batch_size {
            // one timestamp filled the batch; rows past the limit would be
            // lost behind the strict `>` of the next poll
            let at = cursors[0];
            let sql = tie_group_query(&mapping.table, &self.config.timestamp_column, at);
            result = self.cache()?.query(&sql).await?;
            cursors = self.row_cursors(mapping, &partition, &result)?;
            keep = cursors.len();
            debug!(
                table = %mapping.table,
                "Fetched {} row(s) sharing timestamp {}",
                keep,
                at
            );
            if keep == 0 {
                return Ok(Vec::new());
            }
        }

        let ctx = RowContext {
            table: &mapping.table,
            partition: &partition,
            columns: &result.columns,
            precision,
        };
        let topic = self.topic(mapping);
        let mut records: Vec<SourceRecord> = Vec::with_capacity(keep);
        let mut skipped = 0usize;
        for (row, cursor) in result.rows[..keep].iter().zip(&cursors) {
            let offset = TimestampOffset::from_precision(*cursor, precision);
            let line = self.mapper.map_row(&ctx, row).and_then(|point| encode(&point));
            match line {
                Ok(line) => records.push(
                    SourceRecord::from_string(topic.clone(), line)
                        .with_key(partition.clone())
                        .with_attribute("table", mapping.table.clone())
                        .with_attribute("precision", precision.as_str())
                        .with_offset(offset.to_persisted(&partition)),
                ),
                Err(e) if e.is_invalid_data() => {
                    warn!(table = %mapping.table, "Skipping row at {}: {}", cursor, e);
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if skipped > 0 {
            if let Some(metrics) = &self.metrics {
                for _ in 0..skipped {
                    metrics.record_skipped();
                }
            }
        }

        // trailing skipped rows are covered by the last emitted record
        let high_water = TimestampOffset::from_precision(cursors[keep - 1], precision);
        match records.last_mut() {
            Some(last) => last.offset = Some(high_water.to_persisted(&partition)),
            None => {
                if let Some(tracker) = self.trackers.get_mut(&partition) {
                    warn!(table = %mapping.table, "Every polled row was skipped, moving past them");
                    tracker.advance(high_water);
                }
            }
        }

        debug!(
            table = %mapping.table,
            "Polled {} record(s) after {:?}",
            records.len(),
            position
        );
        Ok(records)
    }
}

/// Extraction query for rows strictly after `after`
pub fn extraction_query(table: &str, timestamp_column: &str, after: i64, limit: usize) -> String {
    format!(
        "SELECT *, CAST({ts} AS BIGINT) AS {cursor} FROM {table} WHERE {ts} > {after} ORDER BY {ts} ASC LIMIT {limit}",
        ts = timestamp_column,
        cursor = CURSOR_COLUMN,
        table = table,
        after = after,
        limit = limit,
    )
}

/// Every row stamped exactly `at`
pub fn tie_group_query(table: &str, timestamp_column: &str, at: i64) -> String {
    format!(
        "SELECT *, CAST({ts} AS BIGINT) AS {cursor} FROM {table} WHERE {ts} = {at}",
        ts = timestamp_column,
        cursor = CURSOR_COLUMN,
        table = table,
        at = at,
    )
}

/// Rows that can be emitted without losing later rows of the same timestamp
///
/// When a query hits its limit, rows sharing the last timestamp may continue
/// past the limit. Those trailing rows are left for the next poll, which
/// starts after the previous timestamp. A full batch made only of one timestamp
/// is returned whole; the caller then fetches that timestamp without a limit.
fn complete_prefix(cursors: &[i64], limit: usize) -> usize {
    if cursors.len() < limit {
        return cursors.len();
    }
    let Some(last) = cursors.last() else {
        return 0;
    };
    match cursors.iter().rposition(|c| c != last) {
        Some(i) => i + 1,
        None => cursors.len(),
    }
}

#[async_trait]
impl SourceConnector for TDengineSourceConnector {
    async fn initialize(&mut self, config: ConnectorConfig) -> ConnectorResult<()> {
        info!("Initializing TDengine source connector");
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
        let metrics = ConnectorMetrics::new(&config.connector_name, "source");
        let mut cache =
            ConnectionCache::new(provider, self.config.precision).with_metrics(metrics.clone());
        if let Some(database) = self.config.target_database() {
            cache.set_database(&database).await?;
        }
        self.cache = Some(cache);
        self.metrics = Some(metrics);

        self.start = TimestampOffset::parse_initial(self.config.initial_timestamp.as_deref())?;
        if self.config.initial_timestamp.is_some() {
            // an explicit start position is a floor for restored offsets
            for mapping in &self.config.tables {
                let partition = mapping.partition().to_string();
                self.trackers
                    .insert(partition.clone(), OffsetTracker::new(partition, self.start));
            }
        }

        info!(
            tables = self.config.tables.len(),
            precision = %self.config.precision,
            "Extraction starts at {:?} for partitions without a committed offset",
            self.start
        );
        Ok(())
    }

    async fn restore(&mut self, offsets: Vec<Offset>) -> ConnectorResult<()> {
        for offset in offsets {
            let known = self
                .config
                .tables
                .iter()
                .any(|m| m.partition() == offset.partition);
            if !known {
                warn!("Ignoring offset of unknown partition '{}'", offset.partition);
                continue;
            }

            let restored = match self.trackers.get_mut(&offset.partition) {
                Some(tracker) => tracker.restore(&offset),
                None => {
                    let position = TimestampOffset::from_persisted(&offset);
                    self.trackers.insert(
                        offset.partition.clone(),
                        OffsetTracker::new(offset.partition.clone(), position),
                    );
                    position
                }
            };
            info!(partition = %offset.partition, "Resuming after {:?}", restored);
        }
        Ok(())
    }

    async fn poll(&mut self) -> ConnectorResult<Vec<SourceRecord>> {
        let mut records = Vec::new();
        for mapping in self.config.tables.clone() {
            records.extend(self.poll_table(&mapping).await?);
        }
        Ok(records)
    }

    async fn commit(&mut self, offsets: Vec<Offset>) -> ConnectorResult<()> {
        for offset in offsets {
            match self.trackers.get_mut(&offset.partition) {
                Some(tracker) => {
                    tracker.advance(TimestampOffset::from_persisted(&offset));
                }
                None => warn!("Commit for unknown partition '{}'", offset.partition),
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> ConnectorResult<()> {
        if let Some(cache) = self.cache.as_mut() {
            cache.close().await;
        }
        info!("TDengine source connector stopped");
        Ok(())
    }
}
