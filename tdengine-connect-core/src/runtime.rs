//! Runtime for managing connector lifecycle.
//!
//! The runtime is the host side of a connector. It handles:
//! - Connector initialization and shutdown
//! - Record loops (inbound stream for sinks, polling for sources)
//! - Retry logic around record processing
//! - Offset persistence and commit ordering for sources
//! - Graceful shutdown

use crate::{
    ConnectorConfig, ConnectorMetrics, ConnectorResult, Offset, OffsetStore, RecordEmitter,
    RecordStream, RetryConfig, RetryStrategy, SinkConnector, SinkRecord, SourceConnector,
    SourceRecord,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Cloneable handle used to stop a running runtime
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Trip the handle when the process receives ctrl-c
    fn listen_for_ctrl_c(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                handle.shutdown();
            }
        });
    }
}

/// Initialize tracing/logging
fn init_tracing(config: &ConnectorConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.processing.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok(); // Ignore if already initialized
}

/// Runtime for Sink Connectors (pipeline → external system)
pub struct SinkRuntime<C: SinkConnector, S: RecordStream> {
    connector: C,
    stream: S,
    config: ConnectorConfig,
    metrics: ConnectorMetrics,
    retry_strategy: RetryStrategy,
    shutdown: ShutdownHandle,
}

impl<C: SinkConnector, S: RecordStream> SinkRuntime<C, S> {
    /// Create a new sink runtime
    pub fn new(connector: C, stream: S, config: ConnectorConfig) -> ConnectorResult<Self> {
        config.validate()?;
        init_tracing(&config);

        info!("Initializing Sink Runtime");
        info!("Connector: {}", config.connector_name);

        let metrics = ConnectorMetrics::new(&config.connector_name, "sink");
        metrics.set_health(true);

        let retry_strategy = RetryStrategy::new(RetryConfig::new(
            config.retry.max_retries,
            config.retry.retry_backoff_ms,
            config.retry.max_backoff_ms,
        ));

        Ok(Self {
            connector,
            stream,
            config,
            metrics,
            retry_strategy,
            shutdown: ShutdownHandle::default(),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Run until the stream ends or a shutdown is requested
    pub async fn run(&mut self) -> ConnectorResult<()> {
        info!("Starting Sink Runtime");
        self.shutdown.listen_for_ctrl_c();

        info!("Initializing connector");
        self.connector.initialize(self.config.clone()).await?;
        info!("Connector initialized successfully");

        let flush_interval = Duration::from_millis(self.config.processing.batch_timeout_ms.max(1));
        let mut last_flush = Instant::now();

        info!("Entering main processing loop");
        while !self.shutdown.is_shutdown() {
            tokio::select! {
                next = self.stream.next_record() => match next {
                    Ok(Some(record)) => {
                        self.metrics.record_received();
                        debug!(
                            "Processing record: topic={}, offset={}",
                            record.topic(),
                            record.offset()
                        );

                        match self.process_with_retry(record).await {
                            Ok(_) => self.metrics.record_success(),
                            Err(e) => {
                                error!("Failed to process record after retries: {}", e);
                                self.metrics.record_error("process");
                                return self.stop_with(Err(e)).await;
                            }
                        }
                    }
                    Ok(None) => {
                        info!("Input stream exhausted");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read input stream: {}", e);
                        self.metrics.record_error("stream");
                        return self.stop_with(Err(e)).await;
                    }
                },
                _ = tokio::time::sleep_until(last_flush + flush_interval) => {}
            }

            if last_flush.elapsed() >= flush_interval {
                if let Err(e) = self.flush_with_retry().await {
                    error!("Failed to flush after retries: {}", e);
                    self.metrics.record_error("flush");
                    return self.stop_with(Err(e)).await;
                }
                last_flush = Instant::now();
            }
        }

        let flushed = self.flush_with_retry().await;
        self.stop_with(flushed).await
    }

    /// Shut the connector down, preferring `outcome`'s error over a shutdown error
    async fn stop_with(&mut self, outcome: ConnectorResult<()>) -> ConnectorResult<()> {
        info!("Shutting down connector");
        let stopped = self.connector.shutdown().await;
        self.metrics.set_health(false);
        info!("Sink Runtime stopped");
        outcome.and(stopped)
    }

    /// Process a record with retry logic
    async fn process_with_retry(&mut self, record: SinkRecord) -> ConnectorResult<()> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match self.connector.process(record.clone()).await {
                Ok(_) => {
                    self.metrics.record_processing_time(start.elapsed());
                    return Ok(());
                }
                Err(e) if e.is_retryable() && self.retry_strategy.should_retry(attempt) => {
                    attempt += 1;
                    self.metrics.record_retry();

                    let backoff = self.retry_strategy.calculate_backoff(attempt);
                    warn!(
                        "Retry attempt {} after {:?} - error: {}",
                        attempt, backoff, e
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) if e.is_invalid_data() => {
                    // Skip invalid records
                    warn!("Skipping invalid record: {}", e);
                    self.metrics.record_skipped();
                    return Ok(());
                }
                Err(e) => {
                    return Err(e);
                }
            }
        }
    }

    /// Flush buffered records, retrying the whole batch on transient failures
    async fn flush_with_retry(&mut self) -> ConnectorResult<()> {
        let mut attempt = 0;

        loop {
            match self.connector.flush().await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() && self.retry_strategy.should_retry(attempt) => {
                    attempt += 1;
                    self.metrics.record_retry();

                    let backoff = self.retry_strategy.calculate_backoff(attempt);
                    warn!(
                        "Flush retry attempt {} after {:?} - error: {}",
                        attempt, backoff, e
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Runtime for Source Connectors (external system → pipeline)
pub struct SourceRuntime<C: SourceConnector, E: RecordEmitter, O: OffsetStore> {
    connector: C,
    emitter: E,
    offsets: O,
    config: ConnectorConfig,
    metrics: ConnectorMetrics,
    shutdown: ShutdownHandle,
}

impl<C: SourceConnector, E: RecordEmitter, O: OffsetStore> SourceRuntime<C, E, O> {
    /// Create a new source runtime
    pub fn new(connector: C, emitter: E, offsets: O, config: ConnectorConfig) -> ConnectorResult<Self> {
        config.validate()?;
        init_tracing(&config);

        info!("Initializing Source Runtime");
        info!("Connector: {}", config.connector_name);

        let metrics = ConnectorMetrics::new(&config.connector_name, "source");
        metrics.set_health(true);

        Ok(Self {
            connector,
            emitter,
            offsets,
            config,
            metrics,
            shutdown: ShutdownHandle::default(),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn offset_store(&self) -> &O {
        &self.offsets
    }

    /// Run until a shutdown is requested
    pub async fn run(&mut self) -> ConnectorResult<()> {
        info!("Starting Source Runtime");
        self.shutdown.listen_for_ctrl_c();

        info!("Initializing connector");
        self.connector.initialize(self.config.clone()).await?;

        let committed = self.offsets.load().await?;
        info!("Restoring {} committed offset(s)", committed.len());
        self.connector.restore(committed).await?;
        info!("Connector initialized successfully");

        self.process_polling_loop().await;

        info!("Shutting down connector");
        self.connector.shutdown().await?;
        self.metrics.set_health(false);
        info!("Source Runtime stopped");
        Ok(())
    }

    /// Main polling loop - polls connector, publishes records, commits offsets
    async fn process_polling_loop(&mut self) {
        info!("Entering main polling loop");
        let poll_interval = Duration::from_millis(self.config.processing.poll_interval_ms);

        while !self.shutdown.is_shutdown() {
            match self.connector.poll().await {
                Ok(records) if !records.is_empty() => {
                    info!("Polled {} records", records.len());
                    self.metrics.record_batch_size(records.len());

                    if let Err(e) = self.publish_and_commit(records).await {
                        // Offsets were not advanced, the batch will be polled again
                        error!("Failed to publish batch: {}", e);
                        self.metrics.record_error("publish");
                        tokio::time::sleep(poll_interval).await;
                    }
                }
                Ok(_) => {
                    // No data, sleep briefly
                    tokio::time::sleep(poll_interval).await;
                }
                Err(e) => {
                    error!("Poll error: {}", e);
                    self.metrics.record_error("poll");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    /// Emit a batch, persist its offsets, then let the connector advance
    async fn publish_and_commit(&mut self, records: Vec<SourceRecord>) -> ConnectorResult<()> {
        let offsets = self.publish_batch(records).await?;
        if offsets.is_empty() {
            return Ok(());
        }

        self.offsets.commit(&offsets).await?;
        self.connector.commit(offsets).await
    }

    /// Publish a batch of records, returning the latest offset per partition
    async fn publish_batch(&mut self, records: Vec<SourceRecord>) -> ConnectorResult<Vec<Offset>> {
        let mut offsets: Vec<Offset> = Vec::new();

        for record in &records {
            let start = Instant::now();
            self.emitter.emit(record).await?;
            self.metrics.record_processing_time(start.elapsed());
            self.metrics.record_success();

            if let Some(offset) = &record.offset {
                match offsets.iter_mut().find(|o| o.partition == offset.partition) {
                    Some(existing) => *existing = offset.clone(),
                    None => offsets.push(offset.clone()),
                }
            }
        }

        self.emitter.flush().await?;
        debug!("Published {} records", records.len());
        Ok(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelStream, ConnectorError, MemoryOffsetStore};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSink {
        processed: Arc<Mutex<Vec<String>>>,
        transient_failures: u32,
        shut_down: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SinkConnector for RecordingSink {
        async fn initialize(&mut self, _config: ConnectorConfig) -> ConnectorResult<()> {
            Ok(())
        }

        async fn process(&mut self, record: SinkRecord) -> ConnectorResult<()> {
            let payload = record.payload_str()?.to_string();
            if payload == "bad" {
                return Err(ConnectorError::format(payload, "rejected"));
            }
            if self.transient_failures > 0 {
                self.transient_failures -= 1;
                return Err(ConnectorError::retryable("connection reset"));
            }
            self.processed.lock().unwrap().push(payload);
            Ok(())
        }

        async fn shutdown(&mut self) -> ConnectorResult<()> {
            self.shut_down.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn fast_config() -> ConnectorConfig {
        let mut config = ConnectorConfig::default();
        config.retry.retry_backoff_ms = 1;
        config.retry.max_backoff_ms = 5;
        config.processing.poll_interval_ms = 5;
        config.processing.batch_timeout_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_sink_runtime_retries_and_skips_invalid() {
        let (tx, rx) = mpsc::channel(8);
        for (i, payload) in ["a", "bad", "b"].iter().enumerate() {
            tx.send(SinkRecord::new("t", i as u64, payload.as_bytes().to_vec()))
                .await
                .unwrap();
        }
        drop(tx);

        let sink = RecordingSink {
            transient_failures: 2,
            ..Default::default()
        };
        let processed = sink.processed.clone();
        let shut_down = sink.shut_down.clone();

        let mut runtime = SinkRuntime::new(sink, ChannelStream::new(rx), fast_config()).unwrap();
        runtime.run().await.unwrap();

        assert_eq!(*processed.lock().unwrap(), vec!["a", "b"]);
        assert!(shut_down.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_sink_runtime_fails_after_retry_budget() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(SinkRecord::new("t", 0, b"a".to_vec())).await.unwrap();
        drop(tx);

        let sink = RecordingSink {
            transient_failures: 10,
            ..Default::default()
        };
        let shut_down = sink.shut_down.clone();

        let mut runtime = SinkRuntime::new(sink, ChannelStream::new(rx), fast_config()).unwrap();
        let err = runtime.run().await.unwrap_err();

        assert!(err.is_retryable());
        assert!(shut_down.load(Ordering::Relaxed));
    }

    struct CountingSource {
        emitted: u64,
        committed: Arc<Mutex<Vec<Offset>>>,
        restored: Arc<Mutex<Vec<Offset>>>,
    }

    #[async_trait]
    impl SourceConnector for CountingSource {
        async fn initialize(&mut self, _config: ConnectorConfig) -> ConnectorResult<()> {
            Ok(())
        }

        async fn restore(&mut self, offsets: Vec<Offset>) -> ConnectorResult<()> {
            *self.restored.lock().unwrap() = offsets;
            Ok(())
        }

        async fn poll(&mut self) -> ConnectorResult<Vec<SourceRecord>> {
            if self.emitted >= 4 {
                return Ok(vec![]);
            }
            let records = (0..2)
                .map(|_| {
                    self.emitted += 1;
                    SourceRecord::from_string("t", format!("m{}", self.emitted)).with_offset(
                        Offset::new("p").with_position("seq", self.emitted as i64),
                    )
                })
                .collect();
            Ok(records)
        }

        async fn commit(&mut self, offsets: Vec<Offset>) -> ConnectorResult<()> {
            self.committed.lock().unwrap().extend(offsets);
            Ok(())
        }
    }

    struct StoppingEmitter {
        sent: Vec<String>,
        stop_after: usize,
        handle: Option<ShutdownHandle>,
    }

    #[async_trait]
    impl RecordEmitter for StoppingEmitter {
        async fn emit(&mut self, record: &SourceRecord) -> ConnectorResult<()> {
            self.sent.push(record.payload_str()?.to_string());
            if self.sent.len() >= self.stop_after {
                if let Some(handle) = &self.handle {
                    handle.shutdown();
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_source_runtime_commits_after_emit() {
        let committed = Arc::new(Mutex::new(Vec::new()));
        let restored = Arc::new(Mutex::new(Vec::new()));
        let source = CountingSource {
            emitted: 0,
            committed: committed.clone(),
            restored: restored.clone(),
        };

        let mut store = MemoryOffsetStore::new();
        store
            .commit(&[Offset::new("p").with_position("seq", 0)])
            .await
            .unwrap();

        let emitter = StoppingEmitter {
            sent: Vec::new(),
            stop_after: 4,
            handle: None,
        };

        let mut runtime = SourceRuntime::new(source, emitter, store, fast_config()).unwrap();
        runtime.emitter.handle = Some(runtime.shutdown_handle());
        runtime.run().await.unwrap();

        assert_eq!(runtime.emitter.sent, vec!["m1", "m2", "m3", "m4"]);
        assert_eq!(restored.lock().unwrap().len(), 1);

        // one offset per batch, the last record of each batch
        let committed = committed.lock().unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].get("seq"), Some(2));
        assert_eq!(committed[1].get("seq"), Some(4));
        assert_eq!(
            runtime.offset_store().get("p").and_then(|o| o.get("seq")),
            Some(4)
        );
    }
}
