//! Context-driven warming candidates
//!
//! The scheduler never invents work for itself; its caller computes a
//! fixed candidate set from the current navigation context and submits
//! each as a task. Behaviorally-confirmed routes rank above generic
//! sibling guesses.

use crate::predictor::CategoryTable;

/// Navigation context at the moment warming is planned.
#[derive(Debug, Clone)]
pub struct WarmingContext {
    /// Category the user is currently browsing, e.g. `"rent"`.
    pub current_category: String,
    /// Listing type within the category, e.g. `"apartment"`.
    pub current_type: String,
    /// Page of the current listing, 1-based.
    pub current_page: u32,
    /// Routes drawn from recent behavior history, most recent first.
    pub recent_routes: Vec<String>,
}

/// A prioritized route to pre-populate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub route: String,
    pub priority: i32,
}

const PRIORITY_BEHAVIOR: i32 = 8;
const PRIORITY_NEXT_PAGE: i32 = 6;
const PRIORITY_POPULAR_TYPE: i32 = 4;
const PRIORITY_SIBLING_LISTING: i32 = 3;

/// Compute the fixed candidate set for a context: up to 3 recent
/// behavior routes, the next 1-2 pages of the current listing, a small
/// set of popular sibling types, and the sibling category's default
/// listing.
pub fn plan_candidates(
    context: &WarmingContext,
    categories: &CategoryTable,
    popular_types: &[String],
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let current_listing = format!(
        "/{}/{}",
        context.current_category, context.current_type
    );

    for route in context.recent_routes.iter().take(3) {
        if route != &current_listing {
            candidates.push(Candidate {
                route: route.clone(),
                priority: PRIORITY_BEHAVIOR,
            });
        }
    }

    for offset in 1..=2u32 {
        candidates.push(Candidate {
            route: format!("{}?page={}", current_listing, context.current_page + offset),
            priority: PRIORITY_NEXT_PAGE,
        });
    }

    if let Some(sibling) = categories.sibling_of(&context.current_category) {
        for listing_type in popular_types.iter().take(3) {
            candidates.push(Candidate {
                route: format!("/{}/{}", sibling.name, listing_type),
                priority: PRIORITY_POPULAR_TYPE,
            });
        }

        candidates.push(Candidate {
            route: sibling.default_route.clone(),
            priority: PRIORITY_SIBLING_LISTING,
        });
    }

    candidates
}
