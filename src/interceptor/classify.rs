//! Request classification
//!
//! A fixed, ordered list of pattern rules evaluated top to bottom; the
//! first match wins. Classification is pure derivation from the request
//! URL, nothing is stored.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::CacheClassId;
use crate::error::Result;

/// Resolution order for a classified request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
}

/// Outcome of classifying a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Name of the rule that matched (or `"fallback"`).
    pub rule: &'static str,
    pub class: CacheClassId,
    pub strategy: Strategy,
}

struct ClassificationRule {
    name: &'static str,
    pattern: Regex,
    /// When set, the rule only matches requests to this origin (or only
    /// requests away from it, when `same_origin` is false).
    same_origin: Option<bool>,
    class: CacheClassId,
    strategy: Strategy,
}

/// Ordered rule table mapping request URLs to (class, strategy).
pub struct Classifier {
    rules: Vec<ClassificationRule>,
    origin: Option<Url>,
    fallback: Classification,
}

impl Classifier {
    /// The standard rule table: immutable static assets, versioned
    /// bundle chunks, build assets, third-party reference APIs, external
    /// media, same-origin dynamic data, navigation routes, then a
    /// network-first fallback.
    pub fn standard(app_origin: &str) -> Result<Self> {
        let origin = Url::parse(app_origin)
            .map_err(|e| crate::error::CacheError::Config(format!("Bad app origin: {}", e)))?;

        let rules = vec![
            ClassificationRule {
                name: "immutable-static",
                pattern: Regex::new(r"\.(woff2?|ttf|otf|eot)(\?.*)?$")?,
                same_origin: None,
                class: CacheClassId::StaticAssets,
                strategy: Strategy::CacheFirst,
            },
            ClassificationRule {
                name: "bundle-chunks",
                pattern: Regex::new(r"\.(js|mjs)(\?.*)?$")?,
                same_origin: None,
                class: CacheClassId::StaticAssets,
                strategy: Strategy::CacheFirst,
            },
            ClassificationRule {
                name: "build-assets",
                pattern: Regex::new(r"\.(css|ico|svg|map)(\?.*)?$")?,
                same_origin: None,
                class: CacheClassId::StaticAssets,
                strategy: Strategy::CacheFirst,
            },
            ClassificationRule {
                name: "reference-api",
                pattern: Regex::new(r"/api/(reference|lookup|taxonomy)/")?,
                same_origin: None,
                class: CacheClassId::ReferenceData,
                strategy: Strategy::CacheFirst,
            },
            ClassificationRule {
                name: "external-media",
                pattern: Regex::new(r"\.(png|jpe?g|gif|webp|avif)(\?.*)?$")?,
                same_origin: Some(false),
                class: CacheClassId::StaticAssets,
                strategy: Strategy::CacheFirst,
            },
            ClassificationRule {
                name: "dynamic-data",
                pattern: Regex::new(r"/api/")?,
                same_origin: Some(true),
                class: CacheClassId::ApiResponses,
                strategy: Strategy::NetworkFirst,
            },
            ClassificationRule {
                name: "navigation",
                pattern: Regex::new(r"^[^?#]*/[^./?#]*(\?.*)?$")?,
                same_origin: Some(true),
                class: CacheClassId::ApiResponses,
                strategy: Strategy::NetworkFirst,
            },
        ];

        Ok(Self {
            rules,
            origin: Some(origin),
            fallback: Classification {
                rule: "fallback",
                class: CacheClassId::ApiResponses,
                strategy: Strategy::NetworkFirst,
            },
        })
    }

    fn is_same_origin(&self, url: &str) -> bool {
        let origin = match &self.origin {
            Some(origin) => origin,
            None => return true,
        };
        match Url::parse(url) {
            Ok(parsed) => parsed.origin() == origin.origin(),
            // Relative URLs are same-origin by definition.
            Err(_) => true,
        }
    }

    /// Classify a request URL; first matching rule wins, otherwise the
    /// explicit (and logged) fallback class applies.
    pub fn classify(&self, url: &str) -> Classification {
        for rule in &self.rules {
            if let Some(wants_same_origin) = rule.same_origin {
                if self.is_same_origin(url) != wants_same_origin {
                    continue;
                }
            }
            if rule.pattern.is_match(url) {
                return Classification {
                    rule: rule.name,
                    class: rule.class,
                    strategy: rule.strategy,
                };
            }
        }

        debug!(url = url, class = %self.fallback.class, "No classification rule matched, using fallback");
        self.fallback.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::standard("https://app.example.com").unwrap()
    }

    #[test]
    fn js_resolves_to_chunks_before_fallback() {
        let c = classifier().classify("https://app.example.com/assets/x.js");
        assert_eq!(c.rule, "bundle-chunks");
        assert_eq!(c.class, CacheClassId::StaticAssets);
        assert_eq!(c.strategy, Strategy::CacheFirst);
    }

    #[test]
    fn first_match_wins_over_later_rules() {
        // Fonts match both the immutable rule and nothing later; chunks
        // must not shadow them.
        let c = classifier().classify("https://cdn.example.com/fonts/inter.woff2");
        assert_eq!(c.rule, "immutable-static");
    }

    #[test]
    fn reference_api_is_cache_first() {
        let c = classifier().classify("https://refdata.example.org/api/reference/regions");
        assert_eq!(c.class, CacheClassId::ReferenceData);
        assert_eq!(c.strategy, Strategy::CacheFirst);
    }

    #[test]
    fn same_origin_api_is_network_first_dynamic_data() {
        let c = classifier().classify("https://app.example.com/api/search?q=x");
        assert_eq!(c.rule, "dynamic-data");
        assert_eq!(c.strategy, Strategy::NetworkFirst);
    }

    #[test]
    fn cross_origin_api_does_not_match_dynamic_data() {
        let c = classifier().classify("https://other.example.net/api/search");
        assert_ne!(c.rule, "dynamic-data");
    }

    #[test]
    fn external_media_only_matches_cross_origin() {
        let external = classifier().classify("https://img.example.net/photo.jpg");
        assert_eq!(external.rule, "external-media");
    }

    #[test]
    fn navigation_routes_classify_same_origin_pages() {
        let c = classifier().classify("https://app.example.com/listings/rent");
        assert_eq!(c.rule, "navigation");
        assert_eq!(c.strategy, Strategy::NetworkFirst);
    }

    #[test]
    fn unmatched_urls_take_the_fallback() {
        let c = classifier().classify("https://elsewhere.example.io/feed.xml");
        assert_eq!(c.rule, "fallback");
        assert_eq!(c.strategy, Strategy::NetworkFirst);
    }
}
