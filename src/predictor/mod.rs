//! Behavior tracking and next-action prediction
//!
//! Records low-level interaction signals into a rolling, bounded
//! history and synthesizes a ranked guess at the user's next navigation
//! target from an ordered set of heuristic rules. Tracking is
//! best-effort: persistence failures never surface to the caller.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::CacheClassId;
use crate::store::TieredStore;

/// Upper bound on the visited-routes history.
const MAX_VISITED_ROUTES: usize = 20;

/// A navigable category of the listing application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    /// Route prefix identifying the category, e.g. `"/rent"`.
    pub route_prefix: String,
    /// The category's default listing route.
    pub default_route: String,
}

/// Closed table of application categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTable {
    categories: Vec<Category>,
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self {
            categories: vec![
                Category {
                    name: "rent".to_string(),
                    route_prefix: "/rent".to_string(),
                    default_route: "/rent".to_string(),
                },
                Category {
                    name: "sale".to_string(),
                    route_prefix: "/sale".to_string(),
                    default_route: "/sale".to_string(),
                },
            ],
        }
    }
}

impl CategoryTable {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    pub fn category_of(&self, route: &str) -> Option<&Category> {
        self.categories
            .iter()
            .find(|c| route.starts_with(&c.route_prefix))
    }

    pub fn sibling_of(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name != name)
    }
}

/// Predictor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub categories: CategoryTable,
    /// Substring identifying a favorites-like route in history.
    pub favorites_marker: String,
    /// Interaction label counted as a pagination click.
    pub pagination_label: String,
    /// Dwell time gate for the favorites rule, in milliseconds.
    pub dwell_threshold_ms: u64,
    /// Scroll depth gate for the favorites rule, in percent.
    pub scroll_threshold_pct: u8,
    /// Key the behavior record is persisted under.
    pub record_key: String,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            categories: CategoryTable::default(),
            favorites_marker: "favorit".to_string(),
            pagination_label: "pagination".to_string(),
            dwell_threshold_ms: 30_000,
            scroll_threshold_pct: 50,
            record_key: "record".to_string(),
        }
    }
}

/// Rolling, bounded history of routes and interactions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorRecord {
    /// Last 20 distinct routes in append order.
    pub visited_routes: Vec<String>,
    /// Total visits per route, counted across duplicate visits too.
    pub visit_counts: HashMap<String, u64>,
    /// Accumulated dwell time per route, milliseconds.
    pub time_per_route: HashMap<String, u64>,
    /// Counts per interaction label.
    pub interaction_counts: HashMap<String, u64>,
    /// Maximum observed scroll depth per route, percent.
    pub scroll_depth_by_route: HashMap<String, u8>,
    pub last_activity_ms: i64,
}

/// A ranked guess at the next navigation target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub route: String,
    pub confidence: f64,
    pub reason: &'static str,
}

impl Prediction {
    /// Warming priority for this prediction.
    pub fn priority(&self) -> i32 {
        (self.confidence * 10.0).round() as i32
    }
}

/// Observes interaction signals and predicts the next navigation.
pub struct BehaviorPredictor {
    store: Arc<TieredStore>,
    config: PredictorConfig,
    record: RwLock<BehaviorRecord>,
}

impl BehaviorPredictor {
    /// Load any persisted behavior record, starting fresh when absent
    /// or unreadable.
    pub async fn load(store: Arc<TieredStore>, config: PredictorConfig) -> Self {
        let record: BehaviorRecord = store
            .get(&config.record_key, CacheClassId::BehaviorHistory)
            .await
            .unwrap_or_default();

        Self {
            store,
            config,
            record: RwLock::new(record),
        }
    }

    /// Persist the current record; best-effort, failures are confined
    /// to the store's own logging and never reach the caller.
    async fn persist(&self) {
        let snapshot = self.record.read().await.clone();
        self.store
            .set(&self.config.record_key, &snapshot, CacheClassId::BehaviorHistory)
            .await;
    }

    pub async fn track_route_visit(&self, route: &str) {
        {
            let mut record = self.record.write().await;
            *record.visit_counts.entry(route.to_string()).or_insert(0) += 1;

            // Exact repeats are suppressed from the route list; the
            // visit count above still advances.
            if !record.visited_routes.iter().any(|r| r == route) {
                record.visited_routes.push(route.to_string());
                if record.visited_routes.len() > MAX_VISITED_ROUTES {
                    record.visited_routes.remove(0);
                }
            }
            record.last_activity_ms = Utc::now().timestamp_millis();
        }
        self.persist().await;
    }

    pub async fn track_time_on_page(&self, route: &str, ms: u64) {
        {
            let mut record = self.record.write().await;
            *record.time_per_route.entry(route.to_string()).or_insert(0) += ms;
            record.last_activity_ms = Utc::now().timestamp_millis();
        }
        self.persist().await;
    }

    pub async fn track_click(&self, label: &str) {
        self.track_interaction(label).await;
    }

    pub async fn track_hover(&self, label: &str) {
        self.track_interaction(label).await;
    }

    async fn track_interaction(&self, label: &str) {
        {
            let mut record = self.record.write().await;
            *record
                .interaction_counts
                .entry(label.to_string())
                .or_insert(0) += 1;
            record.last_activity_ms = Utc::now().timestamp_millis();
        }
        self.persist().await;
    }

    pub async fn track_scroll_depth(&self, route: &str, percent: u8) {
        {
            let mut record = self.record.write().await;
            let depth = record
                .scroll_depth_by_route
                .entry(route.to_string())
                .or_insert(0);
            *depth = (*depth).max(percent.min(100));
            record.last_activity_ms = Utc::now().timestamp_millis();
        }
        self.persist().await;
    }

    pub async fn record(&self) -> BehaviorRecord {
        self.record.read().await.clone()
    }

    /// Evaluate the heuristic rules in order against the current
    /// record; the first applicable rule wins.
    pub async fn predict_next_action(&self, current_route: &str) -> Option<Prediction> {
        let record = self.record.read().await;
        let prediction = predict(&record, current_route, &self.config);
        if let Some(ref p) = prediction {
            debug!(route = %p.route, confidence = p.confidence, reason = p.reason, "Predicted next action");
        }
        prediction
    }
}

fn predict(
    record: &BehaviorRecord,
    current_route: &str,
    config: &PredictorConfig,
) -> Option<Prediction> {
    // Rule 1: prior visits to the opposite category predict its default
    // listing.
    if let Some(current_category) = config.categories.category_of(current_route) {
        let visited_other = config.categories.categories.iter().find(|other| {
            other.name != current_category.name
                && record
                    .visit_counts
                    .keys()
                    .any(|route| route.starts_with(&other.route_prefix))
        });
        if let Some(other) = visited_other {
            return Some(Prediction {
                route: other.default_route.clone(),
                confidence: 0.7,
                reason: "opposite-category-history",
            });
        }
    }

    // Rule 2: long dwell with deep scroll and a favorites-like route in
    // history predicts a return to it.
    let dwell = record.time_per_route.get(current_route).copied().unwrap_or(0);
    let scroll = record
        .scroll_depth_by_route
        .get(current_route)
        .copied()
        .unwrap_or(0);
    if dwell > config.dwell_threshold_ms && scroll > config.scroll_threshold_pct {
        if let Some(favorites) = record
            .visited_routes
            .iter()
            .find(|route| route.contains(&config.favorites_marker))
        {
            return Some(Prediction {
                route: favorites.clone(),
                confidence: 0.6,
                reason: "favorites-dwell",
            });
        }
    }

    // Rule 3: pagination momentum predicts the next page.
    let pagination_clicks = record
        .interaction_counts
        .get(&config.pagination_label)
        .copied()
        .unwrap_or(0);
    if pagination_clicks > 2 {
        return Some(Prediction {
            route: next_page_route(current_route),
            confidence: 0.8,
            reason: "pagination-momentum",
        });
    }

    // Rule 4: the most-frequently-visited route other than the current
    // one, when visited more than twice.
    let frequent = record
        .visit_counts
        .iter()
        .filter(|(route, count)| route.as_str() != current_route && **count > 2)
        .max_by_key(|(_, count)| **count);
    if let Some((route, _)) = frequent {
        return Some(Prediction {
            route: route.clone(),
            confidence: 0.5,
            reason: "frequent-route",
        });
    }

    None
}

/// Next page of a route: increment an existing `page` parameter, or
/// start at page 2.
fn next_page_route(route: &str) -> String {
    if let Some((base, query)) = route.split_once('?') {
        let mut params: Vec<String> = Vec::new();
        let mut bumped = false;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("page", value)) => {
                    let next = value.parse::<u32>().unwrap_or(1) + 1;
                    params.push(format!("page={}", next));
                    bumped = true;
                }
                _ => params.push(pair.to_string()),
            }
        }
        if !bumped {
            params.push("page=2".to_string());
        }
        format!("{}?{}", base, params.join("&"))
    } else {
        format!("{}?page=2", route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassRegistry;
    use crate::store::MemoryMedium;

    fn test_store() -> Arc<TieredStore> {
        Arc::new(TieredStore::new(
            Arc::new(MemoryMedium::new()),
            Arc::new(MemoryMedium::new()),
            ClassRegistry::default(),
            "test:",
        ))
    }

    fn ab_config() -> PredictorConfig {
        PredictorConfig {
            categories: CategoryTable::new(vec![
                Category {
                    name: "a".to_string(),
                    route_prefix: "/a".to_string(),
                    default_route: "/a".to_string(),
                },
                Category {
                    name: "b".to_string(),
                    route_prefix: "/b".to_string(),
                    default_route: "/b".to_string(),
                },
            ]),
            ..Default::default()
        }
    }

    async fn predictor(config: PredictorConfig) -> BehaviorPredictor {
        BehaviorPredictor::load(test_store(), config).await
    }

    #[tokio::test]
    async fn opposite_category_history_predicts_its_listing() {
        let p = predictor(ab_config()).await;
        p.track_route_visit("/a").await;
        p.track_route_visit("/b").await;
        p.track_route_visit("/a").await;

        let prediction = p.predict_next_action("/a").await.unwrap();
        assert_eq!(prediction.route, "/b");
        assert_eq!(prediction.confidence, 0.7);
        assert_eq!(prediction.reason, "opposite-category-history");
        assert_eq!(prediction.priority(), 7);
    }

    #[tokio::test]
    async fn favorites_dwell_rule_fires_after_long_engaged_visit() {
        let p = predictor(PredictorConfig::default()).await;
        p.track_route_visit("/favorites").await;
        p.track_route_visit("/rent/apartment").await;
        p.track_time_on_page("/rent/apartment", 45_000).await;
        p.track_scroll_depth("/rent/apartment", 80).await;

        // Current route is in the rent category with no sale history,
        // so rule 1 does not apply.
        let prediction = p.predict_next_action("/rent/apartment").await.unwrap();
        assert_eq!(prediction.route, "/favorites");
        assert_eq!(prediction.reason, "favorites-dwell");
    }

    #[tokio::test]
    async fn pagination_momentum_predicts_next_page() {
        let p = predictor(PredictorConfig::default()).await;
        for _ in 0..3 {
            p.track_click("pagination").await;
        }

        let prediction = p.predict_next_action("/search?q=flat").await.unwrap();
        assert_eq!(prediction.route, "/search?q=flat&page=2");
        assert_eq!(prediction.confidence, 0.8);

        let paged = p.predict_next_action("/search?q=flat&page=4").await.unwrap();
        assert_eq!(paged.route, "/search?q=flat&page=5");
    }

    #[tokio::test]
    async fn frequent_route_rule_requires_three_visits() {
        let p = predictor(PredictorConfig::default()).await;
        p.track_route_visit("/about").await;
        p.track_route_visit("/about").await;
        p.track_route_visit("/contact").await;

        // Two visits are not enough.
        assert_eq!(p.predict_next_action("/contact").await, None);

        p.track_route_visit("/about").await;
        let prediction = p.predict_next_action("/contact").await.unwrap();
        assert_eq!(prediction.route, "/about");
        assert_eq!(prediction.confidence, 0.5);
    }

    #[tokio::test]
    async fn no_signal_yields_no_prediction() {
        let p = predictor(PredictorConfig::default()).await;
        assert_eq!(p.predict_next_action("/rent").await, None);
    }

    #[tokio::test]
    async fn visited_routes_are_bounded_and_deduplicated() {
        let p = predictor(PredictorConfig::default()).await;

        for i in 0..25 {
            p.track_route_visit(&format!("/page-{}", i)).await;
        }
        p.track_route_visit("/page-24").await;

        let record = p.record().await;
        assert_eq!(record.visited_routes.len(), MAX_VISITED_ROUTES);
        // Oldest entries rolled off; duplicate visit did not re-append.
        assert!(!record.visited_routes.contains(&"/page-0".to_string()));
        assert_eq!(record.visit_counts["/page-24"], 2);
    }

    #[tokio::test]
    async fn record_persists_across_predictor_instances() {
        let store = test_store();

        let first = BehaviorPredictor::load(Arc::clone(&store), PredictorConfig::default()).await;
        first.track_route_visit("/rent").await;
        first.track_scroll_depth("/rent", 70).await;

        let second = BehaviorPredictor::load(store, PredictorConfig::default()).await;
        let record = second.record().await;
        assert_eq!(record.visited_routes, vec!["/rent".to_string()]);
        assert_eq!(record.scroll_depth_by_route["/rent"], 70);
    }

    #[tokio::test]
    async fn scroll_depth_keeps_the_maximum() {
        let p = predictor(PredictorConfig::default()).await;
        p.track_scroll_depth("/rent", 60).await;
        p.track_scroll_depth("/rent", 30).await;
        p.track_scroll_depth("/rent", 150).await;

        let record = p.record().await;
        // Clamped to 100, never regresses.
        assert_eq!(record.scroll_depth_by_route["/rent"], 100);
    }
}
