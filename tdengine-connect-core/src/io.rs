//! Record transports for running connectors as standalone processes.

use crate::{ConnectorError, ConnectorResult, RecordEmitter, RecordStream, SinkRecord, SourceRecord};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Reads newline-delimited records, e.g. from stdin
///
/// `next_record` is cancel safe: bytes of a partially received line stay in
/// the stream until the rest of the line arrives.
pub struct LineStream<R> {
    reader: R,
    topic: String,
    position: u64,
    buffer: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin + Send> LineStream<R> {
    pub fn new(reader: R, topic: impl Into<String>) -> Self {
        Self {
            reader,
            topic: topic.into(),
            position: 0,
            buffer: Vec::new(),
        }
    }

    /// Next complete line, or the unterminated tail at end of input
    async fn next_line(&mut self) -> ConnectorResult<Option<Vec<u8>>> {
        loop {
            // only fill_buf is awaited, and it consumes nothing
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.buffer)));
            }

            match available.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    self.buffer.extend_from_slice(&available[..end]);
                    self.reader.consume(end + 1);
                    return Ok(Some(std::mem::take(&mut self.buffer)));
                }
                None => {
                    let read = available.len();
                    self.buffer.extend_from_slice(available);
                    self.reader.consume(read);
                }
            }
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> RecordStream for LineStream<R> {
    async fn next_record(&mut self) -> ConnectorResult<Option<SinkRecord>> {
        while let Some(mut line) = self.next_line().await? {
            while line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let record = SinkRecord::new(&self.topic, self.position, line);
            self.position += 1;
            return Ok(Some(record));
        }
        Ok(None)
    }
}

/// Receives records from an in-process channel
pub struct ChannelStream {
    receiver: mpsc::Receiver<SinkRecord>,
}

impl ChannelStream {
    pub fn new(receiver: mpsc::Receiver<SinkRecord>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl RecordStream for ChannelStream {
    async fn next_record(&mut self) -> ConnectorResult<Option<SinkRecord>> {
        Ok(self.receiver.recv().await)
    }
}

/// Writes each record payload as one line, e.g. to stdout
pub struct WriterEmitter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> WriterEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> RecordEmitter for WriterEmitter<W> {
    async fn emit(&mut self, record: &SourceRecord) -> ConnectorResult<()> {
        self.writer.write_all(&record.payload).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    async fn flush(&mut self) -> ConnectorResult<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Sends records into an in-process channel
pub struct ChannelEmitter {
    sender: mpsc::Sender<SourceRecord>,
}

impl ChannelEmitter {
    pub fn new(sender: mpsc::Sender<SourceRecord>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl RecordEmitter for ChannelEmitter {
    async fn emit(&mut self, record: &SourceRecord) -> ConnectorResult<()> {
        self.sender
            .send(record.clone())
            .await
            .map_err(|e| ConnectorError::fatal_with_source("Record channel closed", e))
    }
}
