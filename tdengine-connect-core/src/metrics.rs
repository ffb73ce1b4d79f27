//! Connector metrics recorded through the `metrics` facade.
//!
//! No exporter is installed here; the embedding process decides where the
//! metrics go.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric handles labelled with the connector name and stream
#[derive(Debug, Clone)]
pub struct ConnectorMetrics {
    connector: String,
    stream: String,
}

impl ConnectorMetrics {
    pub fn new(connector: &str, stream: &str) -> Self {
        Self {
            connector: connector.to_string(),
            stream: stream.to_string(),
        }
    }

    fn labels(&self) -> [(&'static str, String); 2] {
        [
            ("connector", self.connector.clone()),
            ("stream", self.stream.clone()),
        ]
    }

    pub fn record_received(&self) {
        counter!("connector_records_received_total", &self.labels()).increment(1);
    }

    pub fn record_success(&self) {
        counter!("connector_records_processed_total", &self.labels()).increment(1);
    }

    pub fn record_error(&self, kind: &str) {
        let mut labels = self.labels().to_vec();
        labels.push(("kind", kind.to_string()));
        counter!("connector_errors_total", &labels).increment(1);
    }

    pub fn record_retry(&self) {
        counter!("connector_retries_total", &self.labels()).increment(1);
    }

    pub fn record_skipped(&self) {
        counter!("connector_records_skipped_total", &self.labels()).increment(1);
    }

    pub fn record_reconnect(&self) {
        counter!("connector_reconnects_total", &self.labels()).increment(1);
    }

    pub fn record_processing_time(&self, duration: Duration) {
        histogram!("connector_processing_seconds", &self.labels()).record(duration.as_secs_f64());
    }

    pub fn record_batch_size(&self, size: usize) {
        histogram!("connector_batch_size", &self.labels()).record(size as f64);
    }

    pub fn set_health(&self, healthy: bool) {
        gauge!("connector_healthy", &self.labels()).set(if healthy { 1.0 } else { 0.0 });
    }
}
