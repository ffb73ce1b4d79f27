//! Records exchanged between the runtimes and connectors.

use crate::{ConnectorError, ConnectorResult, Offset};
use std::collections::HashMap;

/// Record passed to sink connectors (pipeline → external system)
#[derive(Debug, Clone)]
pub struct SinkRecord {
    /// Topic the record was read from
    pub topic: String,
    /// Position of the record within its stream
    pub offset: u64,
    /// The record payload
    pub payload: Vec<u8>,
    /// Record attributes/headers
    pub attributes: HashMap<String, String>,
}

impl SinkRecord {
    pub fn new(topic: impl Into<String>, offset: u64, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            offset,
            payload,
            attributes: HashMap::new(),
        }
    }

    /// Get the payload as bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload as a UTF-8 string (if valid)
    pub fn payload_str(&self) -> ConnectorResult<&str> {
        std::str::from_utf8(&self.payload).map_err(|e| ConnectorError::InvalidData {
            message: format!("Payload is not valid UTF-8: {}", e),
            payload: self.payload.clone(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Get a specific attribute value
    pub fn get_attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Record produced by source connectors (external system → pipeline)
#[derive(Debug, Clone)]
pub struct SourceRecord {
    /// The topic to publish to
    pub topic: String,
    /// The message payload
    pub payload: Vec<u8>,
    /// Optional message attributes/headers
    pub attributes: HashMap<String, String>,
    /// Optional routing key
    pub key: Option<String>,
    /// Source position reached once this record is emitted
    pub offset: Option<Offset>,
}

impl SourceRecord {
    /// Create a new SourceRecord with payload
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            attributes: HashMap::new(),
            key: None,
            offset: None,
        }
    }

    /// Create a SourceRecord from a string payload
    pub fn from_string(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(topic, payload.into().into_bytes())
    }

    /// Add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the routing key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach the source position this record represents
    pub fn with_offset(mut self, offset: Offset) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Get the payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Get the payload as a string slice (if valid UTF-8)
    pub fn payload_str(&self) -> ConnectorResult<&str> {
        std::str::from_utf8(&self.payload).map_err(|e| {
            ConnectorError::Serialization(format!("Payload is not valid UTF-8: {}", e))
        })
    }
}
