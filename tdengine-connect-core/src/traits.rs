//! Connector lifecycle traits and the record transport seams used by the runtimes.

use crate::{ConnectorConfig, ConnectorResult, Offset, SinkRecord, SourceRecord};
use async_trait::async_trait;

/// Connector writing pipeline records into an external system
#[async_trait]
pub trait SinkConnector: Send {
    /// Prepare connections and resources; called once before any record
    async fn initialize(&mut self, config: ConnectorConfig) -> ConnectorResult<()>;

    /// Handle a single record
    async fn process(&mut self, record: SinkRecord) -> ConnectorResult<()>;

    /// Handle several records; defaults to processing them one by one
    async fn process_batch(&mut self, records: Vec<SinkRecord>) -> ConnectorResult<()> {
        for record in records {
            self.process(record).await?;
        }
        Ok(())
    }

    /// Write out anything buffered
    async fn flush(&mut self) -> ConnectorResult<()> {
        Ok(())
    }

    /// Release resources; called once on stop
    async fn shutdown(&mut self) -> ConnectorResult<()> {
        Ok(())
    }
}

/// Connector reading records out of an external system
#[async_trait]
pub trait SourceConnector: Send {
    /// Prepare connections and resources; called once before the first poll
    async fn initialize(&mut self, config: ConnectorConfig) -> ConnectorResult<()>;

    /// Resume from offsets committed by a previous run
    async fn restore(&mut self, _offsets: Vec<Offset>) -> ConnectorResult<()> {
        Ok(())
    }

    /// Fetch the next batch; an empty batch means no new data
    async fn poll(&mut self) -> ConnectorResult<Vec<SourceRecord>>;

    /// Acknowledge offsets whose records were emitted and persisted
    async fn commit(&mut self, _offsets: Vec<Offset>) -> ConnectorResult<()> {
        Ok(())
    }

    /// Release resources; called once on stop
    async fn shutdown(&mut self) -> ConnectorResult<()> {
        Ok(())
    }
}

/// Inbound record stream feeding a sink runtime
#[async_trait]
pub trait RecordStream: Send {
    /// Next record, `None` once the stream is exhausted
    async fn next_record(&mut self) -> ConnectorResult<Option<SinkRecord>>;
}

/// Downstream target for records produced by a source runtime
#[async_trait]
pub trait RecordEmitter: Send {
    /// Durably hand over one record
    async fn emit(&mut self, record: &SourceRecord) -> ConnectorResult<()>;

    /// Flush anything the emitter buffers
    async fn flush(&mut self) -> ConnectorResult<()> {
        Ok(())
    }
}
