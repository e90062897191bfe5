//! Request and response types at the transport boundary

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Read methods are eligible for interception; everything else passes
/// straight through to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub fn is_read(self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

/// An outbound read as seen by the interceptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    pub method: Method,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
        }
    }
}

/// A response, with freshness metadata stamped when stored.
///
/// Freshness travels with the response itself (`cached_at_ms` plus
/// `max_age_ms`), independent of the tiered store's own entry TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
    /// When the interceptor stored this response; `None` until stored.
    pub cached_at_ms: Option<i64>,
    /// Freshness window stamped at store time.
    pub max_age_ms: Option<u64>,
}

impl CachedResponse {
    pub fn new(url: impl Into<String>, status: u16, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            status,
            body,
            cached_at_ms: None,
            max_age_ms: None,
        }
    }

    /// Stamp store-time metadata.
    pub fn stamped(mut self, max_age_ms: u64) -> Self {
        self.cached_at_ms = Some(Utc::now().timestamp_millis());
        self.max_age_ms = Some(max_age_ms);
        self
    }

    /// A response is fresh while its stamped age window has not lapsed.
    /// Unstamped responses are never fresh.
    pub fn is_fresh(&self) -> bool {
        match (self.cached_at_ms, self.max_age_ms) {
            (Some(cached_at), Some(max_age)) => {
                Utc::now().timestamp_millis().saturating_sub(cached_at) <= max_age as i64
            }
            _ => false,
        }
    }
}
