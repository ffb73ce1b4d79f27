//! Source offsets and the stores that persist them.
//!
//! An [`Offset`] is an opaque key/value snapshot per source partition. The
//! runtime persists offsets through an [`OffsetStore`] after records have been
//! emitted and hands them back to the connector on restart.

use crate::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Position of a source partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset {
    /// Source partition this position belongs to
    pub partition: String,
    /// Connector-defined position components
    pub position: BTreeMap<String, i64>,
}

impl Offset {
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            position: BTreeMap::new(),
        }
    }

    pub fn with_position(mut self, key: impl Into<String>, value: i64) -> Self {
        self.position.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.position.get(key).copied()
    }
}

/// Persistence for committed source offsets
#[async_trait]
pub trait OffsetStore: Send {
    /// Load every committed offset
    async fn load(&self) -> ConnectorResult<Vec<Offset>>;

    /// Persist offsets, replacing earlier values of the same partitions
    async fn commit(&mut self, offsets: &[Offset]) -> ConnectorResult<()>;
}

/// In-memory store, lost on restart
#[derive(Debug, Default, Clone)]
pub struct MemoryOffsetStore {
    offsets: HashMap<String, Offset>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, partition: &str) -> Option<&Offset> {
        self.offsets.get(partition)
    }
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn load(&self) -> ConnectorResult<Vec<Offset>> {
        Ok(self.offsets.values().cloned().collect())
    }

    async fn commit(&mut self, offsets: &[Offset]) -> ConnectorResult<()> {
        for offset in offsets {
            self.offsets
                .insert(offset.partition.clone(), offset.clone());
        }
        Ok(())
    }
}

/// JSON file store, rewritten atomically on every commit
#[derive(Debug)]
pub struct FileOffsetStore {
    path: PathBuf,
    offsets: BTreeMap<String, BTreeMap<String, i64>>,
}

impl FileOffsetStore {
    /// Open the store, reading existing offsets if the file exists
    pub async fn open(path: impl AsRef<Path>) -> ConnectorResult<Self> {
        let path = path.as_ref().to_path_buf();

        let offsets = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ConnectorError::Serialization(format!(
                    "Failed to parse offset file {}: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, offsets })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OffsetStore for FileOffsetStore {
    async fn load(&self) -> ConnectorResult<Vec<Offset>> {
        Ok(self
            .offsets
            .iter()
            .map(|(partition, position)| Offset {
                partition: partition.clone(),
                position: position.clone(),
            })
            .collect())
    }

    async fn commit(&mut self, offsets: &[Offset]) -> ConnectorResult<()> {
        for offset in offsets {
            self.offsets
                .insert(offset.partition.clone(), offset.position.clone());
        }

        let bytes = serde_json::to_vec_pretty(&self.offsets)
            .map_err(|e| ConnectorError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(
            "Persisted {} offset(s) to {}",
            offsets.len(),
            self.path.display()
        );
        Ok(())
    }
}
