//! Tiered key/value store with TTL, schema versioning and compression
//!
//! Entries are validated lazily: expiry and schema mismatches are only
//! detected on the next read (or during `cleanup`), at which point the
//! entry is deleted and reported as absent. Storage and parse failures
//! never propagate to callers; they degrade to a logged miss.

use chrono::Utc;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{CacheClassId, ClassRegistry, Retention};
use crate::error::Result;
use crate::store::compression;
use crate::store::medium::StorageMedium;

/// Serialized entry envelope as written to the medium.
///
/// Immutable once written; a set for an existing key fully replaces it.
#[derive(Debug, Serialize, Deserialize)]
struct EntryEnvelope {
    stored_at_ms: i64,
    ttl_ms: u64,
    schema_version: String,
    compressed: bool,
    payload: Vec<u8>,
}

impl EntryEnvelope {
    fn is_valid(&self, expected_version: &str, now_ms: i64) -> bool {
        self.schema_version == expected_version
            && now_ms.saturating_sub(self.stored_at_ms) <= self.ttl_ms as i64
    }
}

/// Hit/miss/eviction counters shared with the monitoring facade.
#[derive(Debug, Default)]
pub struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl StoreCounters {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

/// Store-wide statistics, read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_entries: usize,
    pub total_size_bytes: usize,
    pub by_class: HashMap<String, ClassStats>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassStats {
    pub entries: usize,
    pub size_bytes: usize,
}

/// Tiered key/value store over a durable and a session medium.
pub struct TieredStore {
    durable: Arc<dyn StorageMedium>,
    session: Arc<dyn StorageMedium>,
    registry: ClassRegistry,
    key_prefix: String,
    counters: Arc<StoreCounters>,
}

impl TieredStore {
    pub fn new(
        durable: Arc<dyn StorageMedium>,
        session: Arc<dyn StorageMedium>,
        registry: ClassRegistry,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            durable,
            session,
            registry,
            key_prefix: key_prefix.into(),
            counters: Arc::new(StoreCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<StoreCounters> {
        Arc::clone(&self.counters)
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Storage identifier: `{prefix}{class}-{key}`, namespaced to avoid
    /// collisions with unrelated data in the shared mediums.
    fn storage_key(&self, class: CacheClassId, key: &str) -> String {
        format!("{}{}-{}", self.key_prefix, class.name(), key)
    }

    fn medium_for(&self, class: CacheClassId) -> &Arc<dyn StorageMedium> {
        match self.registry.get(class).retention {
            Retention::Durable => &self.durable,
            Retention::Session => &self.session,
        }
    }

    /// Resolve the class a storage identifier belongs to, if any.
    fn class_of(&self, storage_key: &str) -> Option<CacheClassId> {
        let rest = storage_key.strip_prefix(&self.key_prefix)?;
        CacheClassId::ALL
            .into_iter()
            .find(|id| rest.starts_with(&format!("{}-", id.name())))
    }

    /// Serialize, stamp and persist a value under the class's medium.
    ///
    /// Storage failures are logged and swallowed; the entry simply does
    /// not exist afterwards.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, class: CacheClassId) {
        if let Err(e) = self.try_set(key, value, class).await {
            warn!(class = %class, key = key, error = %e, "Cache write failed");
        }
    }

    async fn try_set<T: Serialize>(&self, key: &str, value: &T, class: CacheClassId) -> Result<()> {
        let config = self.registry.get(class);
        let serialized = serde_json::to_vec(value)?;

        let (payload, compressed) = if config.compress {
            (compression::compress(&serialized)?, true)
        } else {
            (serialized, false)
        };

        let envelope = EntryEnvelope {
            stored_at_ms: Self::now_ms(),
            ttl_ms: config.ttl_ms,
            schema_version: config.schema_version.clone(),
            compressed,
            payload,
        };

        let storage_key = self.storage_key(class, key);
        let bytes = serde_json::to_vec(&envelope)?;
        self.medium_for(class).write(&storage_key, bytes).await?;

        debug!(class = %class, key = key, "Stored cache entry");
        Ok(())
    }

    /// Read and validate an entry; any invalid or unreadable state is
    /// deleted and reported as absent (lazy invalidation).
    pub async fn get<T: DeserializeOwned>(&self, key: &str, class: CacheClassId) -> Option<T> {
        let storage_key = self.storage_key(class, key);
        let medium = self.medium_for(class);

        let bytes = match medium.read(&storage_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                warn!(class = %class, key = key, error = %e, "Cache read failed, treating as miss");
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let envelope: EntryEnvelope = match serde_json::from_slice(&bytes) {
            Ok(env) => env,
            Err(e) => {
                warn!(class = %class, key = key, error = %e, "Unparseable cache entry, deleting");
                self.remove_silently(medium, &storage_key).await;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let expected_version = &self.registry.get(class).schema_version;
        if !envelope.is_valid(expected_version, Self::now_ms()) {
            debug!(class = %class, key = key, "Stale or version-mismatched entry, deleting");
            self.remove_silently(medium, &storage_key).await;
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let payload = if envelope.compressed {
            match compression::decompress(&envelope.payload) {
                Ok(p) => p,
                Err(e) => {
                    warn!(class = %class, key = key, error = %e, "Failed to decompress entry, deleting");
                    self.remove_silently(medium, &storage_key).await;
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        } else {
            envelope.payload
        };

        match serde_json::from_slice(&payload) {
            Ok(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(e) => {
                warn!(class = %class, key = key, error = %e, "Failed to parse cached payload, deleting");
                self.remove_silently(medium, &storage_key).await;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remove an entry if present; no-op otherwise.
    pub async fn delete(&self, key: &str, class: CacheClassId) {
        let storage_key = self.storage_key(class, key);
        self.remove_silently(self.medium_for(class), &storage_key)
            .await;
    }

    async fn remove_silently(&self, medium: &Arc<dyn StorageMedium>, storage_key: &str) {
        if let Err(e) = medium.remove(storage_key).await {
            warn!(storage_key = storage_key, error = %e, "Failed to remove cache entry");
        }
    }

    /// Scan all entries across both mediums and delete any that fail
    /// schema-version or TTL validation, or that fail to parse.
    ///
    /// Intended to run on a timer and before teardown, not at startup.
    pub async fn cleanup(&self) -> usize {
        let mut removed = 0;
        let now = Self::now_ms();

        for medium in [&self.durable, &self.session] {
            let keys = match medium.keys().await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "Cleanup could not list medium keys");
                    continue;
                }
            };

            for storage_key in keys {
                if !storage_key.starts_with(&self.key_prefix) {
                    // Unrelated application data in the shared medium.
                    continue;
                }

                let class = match self.class_of(&storage_key) {
                    Some(class) => class,
                    None => {
                        // Namespaced to us but not a known class; a
                        // leftover from a removed class. Delete it.
                        info!(storage_key = %storage_key, "Removing entry with unknown cache class");
                        self.remove_silently(medium, &storage_key).await;
                        removed += 1;
                        continue;
                    }
                };

                let valid = match medium.read(&storage_key).await {
                    Ok(Some(bytes)) => serde_json::from_slice::<EntryEnvelope>(&bytes)
                        .map(|env| env.is_valid(&self.registry.get(class).schema_version, now))
                        .unwrap_or(false),
                    Ok(None) => continue,
                    Err(_) => false,
                };

                if !valid {
                    self.remove_silently(medium, &storage_key).await;
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!(removed = removed, "Cleanup removed invalid cache entries");
        }
        removed
    }

    /// Spawn a background task running `cleanup` on an interval.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            // Skip the immediate first tick to avoid startup latency.
            interval.tick().await;

            loop {
                interval.tick().await;
                store.cleanup().await;
            }
        })
    }

    /// Entry counts and serialized sizes, grouped by class. Read-only.
    pub async fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();

        for medium in [&self.durable, &self.session] {
            let keys = match medium.keys().await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "Stats could not list medium keys");
                    continue;
                }
            };

            for storage_key in keys {
                let class = match self.class_of(&storage_key) {
                    Some(class) => class,
                    None => continue,
                };
                let size = match medium.read(&storage_key).await {
                    Ok(Some(bytes)) => bytes.len(),
                    _ => continue,
                };

                stats.total_entries += 1;
                stats.total_size_bytes += size;
                let class_stats = stats.by_class.entry(class.name().to_string()).or_default();
                class_stats.entries += 1;
                class_stats.size_bytes += size;
            }
        }

        stats
    }

    /// Delete all entries whose storage identifier matches the pattern.
    ///
    /// Used for targeted invalidation by business-logic callers, e.g.
    /// all cached search results.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern)?;
        let mut removed = 0;

        for medium in [&self.durable, &self.session] {
            let keys = match medium.keys().await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "Invalidation could not list medium keys");
                    continue;
                }
            };

            for storage_key in keys {
                if self.class_of(&storage_key).is_some() && regex.is_match(&storage_key) {
                    self.remove_silently(medium, &storage_key).await;
                    removed += 1;
                }
            }
        }

        info!(pattern = pattern, removed = removed, "Invalidated entries by pattern");
        Ok(removed)
    }
}
