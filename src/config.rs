//! Cache class table and runtime configuration
//!
//! Cache classes are process-wide static configuration: a closed set of
//! identifiers, each carrying TTL, compression, retention and capacity
//! settings. The registry is built once at startup and handed to the
//! store; tests and deploys may override individual classes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed set of cache class identifiers.
///
/// Every cached value belongs to exactly one class; there is no runtime
/// class creation and no string-keyed lookup with a silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheClassId {
    /// Short-lived search/listing query results.
    SearchResults,
    /// Long-lived reference data (lookup tables, taxonomies).
    ReferenceData,
    /// Small volatile ranges (price bounds, counts).
    VolatileRanges,
    /// User behavior history for the predictor.
    BehaviorHistory,
    /// Immutable static assets intercepted at the transport boundary.
    StaticAssets,
    /// Same-origin dynamic API responses.
    ApiResponses,
}

impl CacheClassId {
    pub const ALL: [CacheClassId; 6] = [
        CacheClassId::SearchResults,
        CacheClassId::ReferenceData,
        CacheClassId::VolatileRanges,
        CacheClassId::BehaviorHistory,
        CacheClassId::StaticAssets,
        CacheClassId::ApiResponses,
    ];

    /// Stable name used in storage key namespacing and metrics labels.
    pub fn name(self) -> &'static str {
        match self {
            CacheClassId::SearchResults => "search-results",
            CacheClassId::ReferenceData => "reference-data",
            CacheClassId::VolatileRanges => "volatile-ranges",
            CacheClassId::BehaviorHistory => "behavior-history",
            CacheClassId::StaticAssets => "static-assets",
            CacheClassId::ApiResponses => "api-responses",
        }
    }
}

impl std::fmt::Display for CacheClassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which medium a class persists to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Outlives the session (backed by the durable medium).
    Durable,
    /// Cleared when the session ends.
    Session,
}

/// Per-class cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheClass {
    /// Entry time-to-live in milliseconds.
    pub ttl_ms: u64,
    /// Apply lossless compression to the payload before persisting.
    pub compress: bool,
    pub retention: Retention,
    /// Bumping this invalidates all existing entries of the class on
    /// next read; the only supported invalidation-by-deploy mechanism.
    pub schema_version: String,
    /// Capacity bound enforced by the request interceptor (oldest-first
    /// eviction). The store itself is unbounded.
    pub max_entries: usize,
}

/// Static class table, overridable per class.
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    classes: HashMap<CacheClassId, CacheClass>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        let mut classes = HashMap::new();
        classes.insert(
            CacheClassId::SearchResults,
            CacheClass {
                ttl_ms: 5 * 60 * 1000,
                compress: true,
                retention: Retention::Session,
                schema_version: "v2".to_string(),
                max_entries: 50,
            },
        );
        classes.insert(
            CacheClassId::ReferenceData,
            CacheClass {
                ttl_ms: 24 * 60 * 60 * 1000,
                compress: true,
                retention: Retention::Durable,
                schema_version: "v1".to_string(),
                max_entries: 100,
            },
        );
        classes.insert(
            CacheClassId::VolatileRanges,
            CacheClass {
                ttl_ms: 60 * 1000,
                compress: false,
                retention: Retention::Session,
                schema_version: "v1".to_string(),
                max_entries: 20,
            },
        );
        classes.insert(
            CacheClassId::BehaviorHistory,
            CacheClass {
                ttl_ms: 7 * 24 * 60 * 60 * 1000,
                compress: false,
                retention: Retention::Durable,
                schema_version: "v1".to_string(),
                max_entries: 1,
            },
        );
        classes.insert(
            CacheClassId::StaticAssets,
            CacheClass {
                ttl_ms: 30 * 24 * 60 * 60 * 1000,
                compress: false,
                retention: Retention::Durable,
                schema_version: "v1".to_string(),
                max_entries: 200,
            },
        );
        classes.insert(
            CacheClassId::ApiResponses,
            CacheClass {
                ttl_ms: 10 * 60 * 1000,
                compress: true,
                retention: Retention::Session,
                schema_version: "v1".to_string(),
                max_entries: 60,
            },
        );
        Self { classes }
    }
}

impl ClassRegistry {
    pub fn get(&self, id: CacheClassId) -> &CacheClass {
        // The map is total over the closed enum by construction.
        self.classes
            .get(&id)
            .unwrap_or_else(|| unreachable!("class registry is total"))
    }

    /// Replace the configuration for one class.
    pub fn with_class(mut self, id: CacheClassId, class: CacheClass) -> Self {
        self.classes.insert(id, class);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (CacheClassId, &CacheClass)> {
        CacheClassId::ALL.iter().map(move |id| (*id, self.get(*id)))
    }
}

/// Runtime configuration for the cache subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Key namespace prefix for the shared storage mediums.
    pub key_prefix: String,
    /// Application name used in interceptor cache object names.
    pub app_name: String,
    /// Version tag embedded in interceptor cache names; changing it
    /// orphans all prior-generation caches.
    pub version_tag: String,
    /// Origin of the application, used for same-origin classification.
    pub app_origin: String,
    /// Path for the durable medium snapshot file, if file-backed.
    pub durable_path: Option<String>,
    pub warming: WarmingConfig,
}

/// Warming scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmingConfig {
    /// Maximum tasks running at once.
    pub max_concurrent: usize,
    /// Idle-wait polling interval in milliseconds.
    pub idle_poll_ms: u64,
    /// Consecutive non-idle polls tolerated before dispatching anyway,
    /// bounding starvation under sustained foreground traffic.
    pub max_idle_polls: u32,
    /// Fixed delay between task dispatches in milliseconds.
    pub inter_task_delay_ms: u64,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            idle_poll_ms: 500,
            max_idle_polls: 20,
            inter_task_delay_ms: 250,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_prefix: "precache:".to_string(),
            app_name: "precache".to_string(),
            version_tag: "v1".to_string(),
            app_origin: "http://localhost:3000".to_string(),
            durable_path: None,
            warming: WarmingConfig::default(),
        }
    }
}

impl Config {
    /// Build a configuration from the environment, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Config {
        let defaults = Config::default();

        let key_prefix =
            std::env::var("PRECACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix);
        let app_name = std::env::var("PRECACHE_APP_NAME").unwrap_or(defaults.app_name);
        let version_tag =
            std::env::var("PRECACHE_VERSION_TAG").unwrap_or(defaults.version_tag);
        let app_origin = std::env::var("PRECACHE_APP_ORIGIN").unwrap_or(defaults.app_origin);
        let durable_path = std::env::var("PRECACHE_DURABLE_PATH").ok();

        let max_concurrent = std::env::var("PRECACHE_WARM_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.warming.max_concurrent);
        let idle_poll_ms = std::env::var("PRECACHE_IDLE_POLL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.warming.idle_poll_ms);

        Config {
            key_prefix,
            app_name,
            version_tag,
            app_origin,
            durable_path,
            warming: WarmingConfig {
                max_concurrent,
                idle_poll_ms,
                ..defaults.warming
            },
        }
    }
}
