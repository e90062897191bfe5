//! Transport-boundary request interception
//!
//! Sits on the path of every outbound read, classifies it against the
//! rule table, and resolves it with a cache-first or network-first
//! strategy against named per-class response caches. Runs in its own
//! context, concurrently with the main thread's store and scheduler; it
//! only shares the response cache storage, with last-write-wins entries.

pub mod classify;
pub mod response;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{CacheClassId, ClassRegistry};
use crate::error::Result;

pub use classify::{Classification, Classifier, Strategy};
pub use response::{CachedResponse, Method, Request};

/// Transport seam; the underlying network layer owns timeouts.
#[async_trait]
pub trait NetworkFetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<CachedResponse>;
}

/// One named response cache, insertion-ordered for eviction.
#[derive(Default)]
struct ClassCache {
    order: VecDeque<String>,
    entries: HashMap<String, CachedResponse>,
}

impl ClassCache {
    fn get(&self, url: &str) -> Option<&CachedResponse> {
        self.entries.get(url)
    }

    fn put(&mut self, url: String, response: CachedResponse) {
        if self.entries.insert(url.clone(), response).is_none() {
            self.order.push_back(url);
        }
    }

    /// Evict oldest-by-insertion entries down to `max_entries`.
    /// Deterministic and O(n); last access plays no part.
    fn evict_to(&mut self, max_entries: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max_entries {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Shared storage of named cache objects. Survives agent generations;
/// `activate` garbage-collects names from earlier generations.
#[derive(Default)]
pub struct CacheStorage {
    caches: Mutex<HashMap<String, ClassCache>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lookup(&self, cache_name: &str, url: &str) -> Option<CachedResponse> {
        let caches = self.caches.lock().await;
        caches.get(cache_name).and_then(|c| c.get(url).cloned())
    }

    async fn store(
        &self,
        cache_name: &str,
        url: &str,
        response: CachedResponse,
        max_entries: usize,
    ) -> usize {
        let mut caches = self.caches.lock().await;
        let cache = caches.entry(cache_name.to_string()).or_default();
        cache.put(url.to_string(), response);
        cache.evict_to(max_entries)
    }

    async fn entry_count(&self, cache_name: &str) -> usize {
        let caches = self.caches.lock().await;
        caches.get(cache_name).map(|c| c.len()).unwrap_or(0)
    }

    /// Drop every cache object whose name is not in `live_names`.
    async fn retain(&self, live_names: &[String]) -> Vec<String> {
        let mut caches = self.caches.lock().await;
        let orphaned: Vec<String> = caches
            .keys()
            .filter(|name| !live_names.contains(name))
            .cloned()
            .collect();
        for name in &orphaned {
            caches.remove(name);
        }
        orphaned
    }
}

/// Control messages accepted from the application context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    SkipWaiting,
    CacheUrls { urls: Vec<String> },
    CacheStrategy { url: String, strategy: Strategy },
    WarmupCache { urls: Option<Vec<String>> },
    GetCacheMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlResponse {
    Ack,
    Metrics(InterceptorMetrics),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptorMetrics {
    pub version: String,
    pub class_names: Vec<String>,
    pub hit_count: u64,
    pub miss_count: u64,
    pub timestamp: i64,
}

/// Interceptor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptorConfig {
    pub app_name: String,
    /// Changing the tag orphans all prior-generation cache objects.
    pub version_tag: String,
    /// URLs pre-populated by a `WarmupCache` message with no explicit
    /// list.
    pub warmup_urls: Vec<String>,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            app_name: "precache".to_string(),
            version_tag: "v1".to_string(),
            warmup_urls: Vec::new(),
        }
    }
}

/// Per-resource-class strategy agent at the transport boundary.
pub struct RequestInterceptor {
    fetcher: Arc<dyn NetworkFetcher>,
    classifier: Classifier,
    storage: Arc<CacheStorage>,
    registry: ClassRegistry,
    config: InterceptorConfig,
    strategy_overrides: DashMap<String, Strategy>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: AtomicU64,
}

impl RequestInterceptor {
    pub fn new(
        fetcher: Arc<dyn NetworkFetcher>,
        classifier: Classifier,
        storage: Arc<CacheStorage>,
        registry: ClassRegistry,
        config: InterceptorConfig,
    ) -> Self {
        Self {
            fetcher,
            classifier,
            storage,
            registry,
            config,
            strategy_overrides: DashMap::new(),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
        }
    }

    fn cache_name(&self, class: CacheClassId) -> String {
        format!(
            "{}-{}-{}",
            self.config.app_name,
            class.name(),
            self.config.version_tag
        )
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.miss_count.load(Ordering::Relaxed)
    }

    pub fn eviction_count(&self) -> u64 {
        self.eviction_count.load(Ordering::Relaxed)
    }

    /// Adopt this agent generation: garbage-collect cache objects named
    /// for any other version tag of this application.
    pub async fn activate(&self) -> usize {
        let live: Vec<String> = CacheClassId::ALL
            .into_iter()
            .map(|class| self.cache_name(class))
            .collect();

        let orphaned = self.storage.retain(&live).await;
        if !orphaned.is_empty() {
            info!(
                version = %self.config.version_tag,
                orphaned = orphaned.len(),
                "Collected prior-generation caches"
            );
        }
        orphaned.len()
    }

    /// Intercept an outbound request. Non-read methods pass straight
    /// through; reads resolve by the classified (or overridden)
    /// strategy.
    pub async fn handle(&self, request: &Request) -> Result<CachedResponse> {
        if !request.method.is_read() {
            return self.fetcher.fetch(request).await;
        }

        let classification = self.classifier.classify(&request.url);
        let strategy = self
            .strategy_overrides
            .get(&request.url)
            .map(|s| *s.value())
            .unwrap_or(classification.strategy);

        match strategy {
            Strategy::CacheFirst => self.cache_first(request, classification.class).await,
            Strategy::NetworkFirst => self.network_first(request, classification.class).await,
        }
    }

    async fn store_response(
        &self,
        class: CacheClassId,
        url: &str,
        response: &CachedResponse,
    ) -> CachedResponse {
        let class_config = self.registry.get(class);
        let stamped = response.clone().stamped(class_config.ttl_ms);

        let evicted = self
            .storage
            .store(
                &self.cache_name(class),
                url,
                stamped.clone(),
                class_config.max_entries,
            )
            .await;
        if evicted > 0 {
            self.eviction_count
                .fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(class = %class, evicted = evicted, "Evicted oldest cached responses");
        }

        stamped
    }

    async fn cache_first(&self, request: &Request, class: CacheClassId) -> Result<CachedResponse> {
        let cache_name = self.cache_name(class);
        let cached = self.storage.lookup(&cache_name, &request.url).await;

        if let Some(ref response) = cached {
            if response.is_fresh() {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                debug!(url = %request.url, class = %class, "Cache hit");
                return Ok(response.clone());
            }
        }

        self.miss_count.fetch_add(1, Ordering::Relaxed);

        match self.fetcher.fetch(request).await {
            Ok(response) => Ok(self.store_response(class, &request.url, &response).await),
            Err(e) => {
                // Expired copy beats a hard failure.
                if let Some(stale) = cached {
                    warn!(url = %request.url, error = %e, "Network failed, serving expired cached copy");
                    return Ok(stale);
                }
                Err(e)
            }
        }
    }

    async fn network_first(
        &self,
        request: &Request,
        class: CacheClassId,
    ) -> Result<CachedResponse> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                Ok(self.store_response(class, &request.url, &response).await)
            }
            Err(e) => {
                let cache_name = self.cache_name(class);
                if let Some(cached) = self.storage.lookup(&cache_name, &request.url).await {
                    // Any cached copy, regardless of freshness.
                    self.hit_count.fetch_add(1, Ordering::Relaxed);
                    warn!(url = %request.url, error = %e, "Network failed, serving cached copy");
                    return Ok(cached);
                }
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Pre-populate the cache for a set of URLs; individual failures are
    /// logged and skipped.
    async fn populate(&self, urls: &[String]) {
        for url in urls {
            let request = Request::get(url.clone());
            if let Err(e) = self.handle(&request).await {
                warn!(url = url.as_str(), error = %e, "Warmup fetch failed");
            }
        }
    }

    /// Handle a control message from the application context.
    pub async fn handle_message(&self, message: ControlMessage) -> ControlResponse {
        match message {
            ControlMessage::SkipWaiting => {
                self.activate().await;
                ControlResponse::Ack
            }
            ControlMessage::CacheUrls { urls } => {
                self.populate(&urls).await;
                ControlResponse::Ack
            }
            ControlMessage::CacheStrategy { url, strategy } => {
                self.strategy_overrides.insert(url, strategy);
                ControlResponse::Ack
            }
            ControlMessage::WarmupCache { urls } => {
                let urls = urls.unwrap_or_else(|| self.config.warmup_urls.clone());
                self.populate(&urls).await;
                ControlResponse::Ack
            }
            ControlMessage::GetCacheMetrics => ControlResponse::Metrics(InterceptorMetrics {
                version: self.config.version_tag.clone(),
                class_names: CacheClassId::ALL.iter().map(|c| c.name().to_string()).collect(),
                hit_count: self.hit_count(),
                miss_count: self.miss_count(),
                timestamp: Utc::now().timestamp_millis(),
            }),
        }
    }
}
