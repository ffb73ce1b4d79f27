//! # TDengine Connect Core
//!
//! Core SDK for building connectors between a streaming pipeline and an
//! external store.
//!
//! This library provides the host side of a connector: lifecycle management,
//! record transport, retries, offset persistence and observability, so that a
//! connector implementation only deals with the external system.
//!
//! ## Overview
//!
//! Connectors either:
//! - **Sink**: Consume records from the pipeline and write to an external system
//! - **Source**: Read from an external system and emit records to the pipeline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tdengine_connect_core::{SinkConnector, SinkRecord, ConnectorConfig, ConnectorResult};
//! use async_trait::async_trait;
//!
//! pub struct MyConnector;
//!
//! #[async_trait]
//! impl SinkConnector for MyConnector {
//!     async fn initialize(&mut self, config: ConnectorConfig) -> ConnectorResult<()> {
//!         // Setup your connector
//!         Ok(())
//!     }
//!
//!     async fn process(&mut self, record: SinkRecord) -> ConnectorResult<()> {
//!         // Process record
//!         println!("Got record: {:?}", record.payload());
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! - **Lifecycle Management**: The runtimes drive initialization, record loops and shutdown
//! - **Retry Logic**: Fixed-interval policies for connections, exponential backoff for batches
//! - **At-least-once Sources**: Offsets are persisted only after records were emitted
//! - **Observability**: Metrics through the `metrics` facade and structured `tracing` logs
//! - **Configuration**: TOML files with environment variable overrides

mod config;
mod error;
mod io;
mod message;
mod metrics;
mod offset;
mod retry;
mod runtime;
mod traits;

// Re-export public API
pub use config::{ConnectorConfig, ProcessingSettings, RetrySettings};
pub use error::{ConnectorError, ConnectorResult};
pub use io::{ChannelEmitter, ChannelStream, LineStream, WriterEmitter};
pub use message::{SinkRecord, SourceRecord};
pub use metrics::ConnectorMetrics;
pub use offset::{FileOffsetStore, MemoryOffsetStore, Offset, OffsetStore};
pub use retry::{RetryConfig, RetryPolicy, RetryStrategy};
pub use runtime::{ShutdownHandle, SinkRuntime, SourceRuntime};
pub use traits::{RecordEmitter, RecordStream, SinkConnector, SourceConnector};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
