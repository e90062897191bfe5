//! Read-only metrics aggregation
//!
//! Collects hit/miss/eviction counters from the store and interceptor
//! and the warming scheduler's state into one serializable snapshot for
//! external reporting. Pure observation, no side effects.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::interceptor::RequestInterceptor;
use crate::store::tiered::ClassStats;
use crate::store::TieredStore;
use crate::warming::{SchedulerStats, WarmingScheduler};

/// JSON-serializable metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub timestamp: i64,
    /// Combined store and interceptor hits.
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_size_bytes: usize,
    pub by_class: HashMap<String, ClassStats>,
    pub warming: SchedulerStats,
}

/// Aggregates counters across the cache components.
pub struct MonitoringFacade {
    store: Arc<TieredStore>,
    interceptor: Arc<RequestInterceptor>,
    scheduler: Arc<WarmingScheduler>,
}

impl MonitoringFacade {
    pub fn new(
        store: Arc<TieredStore>,
        interceptor: Arc<RequestInterceptor>,
        scheduler: Arc<WarmingScheduler>,
    ) -> Self {
        Self {
            store,
            interceptor,
            scheduler,
        }
    }

    pub async fn report(&self) -> MetricsReport {
        let store_stats = self.store.stats().await;
        let counters = self.store.counters();

        MetricsReport {
            timestamp: Utc::now().timestamp_millis(),
            hits: counters.hits() + self.interceptor.hit_count(),
            misses: counters.misses() + self.interceptor.miss_count(),
            evictions: counters.evictions() + self.interceptor.eviction_count(),
            total_size_bytes: store_stats.total_size_bytes,
            by_class: store_stats.by_class,
            warming: self.scheduler.stats().await,
        }
    }
}
