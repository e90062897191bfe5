//! precache - a client-resident, multi-tier caching and warming engine
//! for a search/listing application
//!
//! The crate decides what to cache, where, for how long, with what
//! transformation, and when to proactively populate the cache before it
//! is needed: a tiered key/value store with TTL, schema versioning and
//! compression; a request-interception agent with per-resource-class
//! strategies; an idle-gated warming scheduler; and a behavior-tracking
//! predictor feeding it prefetch candidates.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod interceptor;
pub mod logging;
pub mod monitoring;
pub mod predictor;
pub mod store;
pub mod warming;

// Re-export commonly used types
pub use config::{CacheClassId, ClassRegistry, Config};
pub use error::{CacheError, Result};

use interceptor::{CacheStorage, Classifier, InterceptorConfig, NetworkFetcher, RequestInterceptor};
use predictor::{BehaviorPredictor, PredictorConfig};
use store::{FileMedium, MemoryMedium, StorageMedium, TieredStore};
use warming::{FetchActivity, WarmingScheduler, WarmingTask};

/// The wired cache subsystem.
///
/// Constructed once by the application root, which passes the `Arc`'d
/// components down; there are no module-level globals. The network
/// fetcher and the in-flight counter belong to the application's data
/// layer and are injected.
pub struct CacheSystem {
    pub store: Arc<TieredStore>,
    pub interceptor: Arc<RequestInterceptor>,
    pub scheduler: Arc<WarmingScheduler>,
    pub predictor: Arc<BehaviorPredictor>,
    pub monitor: monitoring::MonitoringFacade,
    pub activity: Arc<FetchActivity>,
}

impl CacheSystem {
    /// Build the subsystem: durable medium (file-backed when a path is
    /// configured), session medium, store, interceptor, scheduler and
    /// predictor, sharing one store instance throughout.
    pub async fn new(config: Config, fetcher: Arc<dyn NetworkFetcher>) -> Result<Self> {
        let durable: Arc<dyn StorageMedium> = match &config.durable_path {
            Some(path) => Arc::new(FileMedium::open(path).await?),
            None => Arc::new(MemoryMedium::new()),
        };
        let session: Arc<dyn StorageMedium> = Arc::new(MemoryMedium::new());

        let store = Arc::new(TieredStore::new(
            durable,
            session,
            ClassRegistry::default(),
            config.key_prefix.clone(),
        ));

        let activity = Arc::new(FetchActivity::new());
        let scheduler = Arc::new(WarmingScheduler::new(
            Arc::clone(&store),
            Arc::clone(&activity),
            config.warming.clone(),
        ));

        let interceptor = Arc::new(RequestInterceptor::new(
            fetcher,
            Classifier::standard(&config.app_origin)?,
            Arc::new(CacheStorage::new()),
            ClassRegistry::default(),
            InterceptorConfig {
                app_name: config.app_name.clone(),
                version_tag: config.version_tag.clone(),
                warmup_urls: Vec::new(),
            },
        ));

        let predictor = Arc::new(
            BehaviorPredictor::load(Arc::clone(&store), PredictorConfig::default()).await,
        );

        let monitor = monitoring::MonitoringFacade::new(
            Arc::clone(&store),
            Arc::clone(&interceptor),
            Arc::clone(&scheduler),
        );

        Ok(Self {
            store,
            interceptor,
            scheduler,
            predictor,
            monitor,
            activity,
        })
    }

    /// Convert the predictor's current guess into a warming task and
    /// enqueue it. Returns the queued key, if any prediction applied.
    pub async fn schedule_predicted(
        &self,
        current_route: &str,
        producer: warming::Producer,
        class: CacheClassId,
    ) -> Option<String> {
        let prediction = self.predictor.predict_next_action(current_route).await?;
        let key = format!("route:{}", prediction.route);

        self.scheduler
            .add_task(WarmingTask::new(
                key.clone(),
                prediction.priority(),
                class,
                producer,
            ))
            .await;
        Some(key)
    }
}
