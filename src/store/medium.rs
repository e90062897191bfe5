//! Storage medium abstraction
//!
//! Two retention classes share one interface: a session medium that
//! lives and dies with the process, and a durable medium that survives
//! restarts. Both may be written from more than one context at once;
//! writes are last-write-wins at the entry level and readers must
//! tolerate an entry disappearing between a read and the next.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

/// Raw byte-level key/value medium.
#[async_trait]
pub trait StorageMedium: Send + Sync {
    /// Read the raw bytes for a key, `None` when absent.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write raw bytes, replacing any existing value.
    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove a key; no-op when absent.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Snapshot of all stored keys.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Session-scoped medium backed by a concurrent in-memory map.
#[derive(Default)]
pub struct MemoryMedium {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageMedium for MemoryMedium {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

/// Durable medium: an in-memory map snapshotted to a single JSON file
/// on every mutation and loaded once at construction.
///
/// The flush lock serializes file writes; concurrent writers to the
/// same key resolve as whichever flush lands last.
pub struct FileMedium {
    path: PathBuf,
    entries: DashMap<String, Vec<u8>>,
    flush_lock: Arc<Mutex<()>>,
}

impl FileMedium {
    /// Open a durable medium at `path`, loading any existing snapshot.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = DashMap::new();

        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, Vec<u8>>>(&bytes) {
                Ok(map) => {
                    for (k, v) in map {
                        entries.insert(k, v);
                    }
                    debug!(path = %path.display(), entries = entries.len(), "Loaded durable snapshot");
                }
                Err(e) => {
                    // A corrupt snapshot is treated as empty; the cache
                    // repopulates on demand.
                    warn!(path = %path.display(), error = %e, "Discarding unreadable durable snapshot");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CacheError::Storage(format!(
                    "Failed to open durable medium at {}: {}",
                    path.display(),
                    e
                )));
            }
        }

        Ok(Self {
            path,
            entries,
            flush_lock: Arc::new(Mutex::new(())),
        })
    }

    async fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().await;

        let map: HashMap<String, Vec<u8>> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let bytes = serde_json::to_vec(&map)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageMedium for FileMedium {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        self.flush().await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.flush().await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_medium_round_trip() {
        let medium = MemoryMedium::new();

        medium.write("a", b"one".to_vec()).await.unwrap();
        assert_eq!(medium.read("a").await.unwrap(), Some(b"one".to_vec()));

        medium.remove("a").await.unwrap();
        assert_eq!(medium.read("a").await.unwrap(), None);

        // Removing a missing key is a no-op
        medium.remove("a").await.unwrap();
    }

    #[tokio::test]
    async fn memory_medium_overwrite_wins() {
        let medium = MemoryMedium::new();

        medium.write("k", b"first".to_vec()).await.unwrap();
        medium.write("k", b"second".to_vec()).await.unwrap();

        assert_eq!(medium.read("k").await.unwrap(), Some(b"second".to_vec()));
        assert_eq!(medium.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_medium_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("precache-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("durable.json");

        {
            let medium = FileMedium::open(&path).await.unwrap();
            medium.write("k", b"persisted".to_vec()).await.unwrap();
        }

        let reopened = FileMedium::open(&path).await.unwrap();
        assert_eq!(
            reopened.read("k").await.unwrap(),
            Some(b"persisted".to_vec())
        );

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn file_medium_tolerates_corrupt_snapshot() {
        let dir = std::env::temp_dir().join(format!("precache-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("durable.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let medium = FileMedium::open(&path).await.unwrap();
        assert!(medium.keys().await.unwrap().is_empty());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
