//! # TDengine Connector
//!
//! Bridges a record pipeline and a TDengine database.
//!
//! - **Sink**: schemaless records (InfluxDB line, OpenTSDB telnet or JSON) are
//!   validated, batched and written through taosAdapter.
//! - **Source**: configured tables are extracted incrementally in timestamp
//!   order and emitted as line protocol, with per-table offsets.
//!
//! Connections come from a [`ConnectionProvider`](provider::ConnectionProvider),
//! which retries with a fixed backoff, and are kept by a
//! [`ConnectionCache`](cache::ConnectionCache) that probes them before reuse
//! and reconnects transparently.

pub mod cache;
pub mod client;
pub mod config;
pub mod mapping;
pub mod offset;
pub mod provider;
pub mod schemaless;
pub mod sink;
pub mod source;
pub mod url;

pub use cache::{ConnectionCache, ConnectionState};
pub use client::{Connection, Credentials, Driver, QueryResult};
pub use config::{Mode, TDengineConfig, TDengineConnectorConfig};
pub use offset::{OffsetTracker, TimestampOffset};
pub use provider::ConnectionProvider;
pub use schemaless::{Point, Precision, Protocol};
pub use sink::TDengineSinkConnector;
pub use source::TDengineSourceConnector;
pub use crate::url::ConnectionUrl;
