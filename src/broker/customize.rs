//! Request rewriting applied once per request before dispatch.

use crate::search::types::{SCORE_FIELD, SearchRequest};

/// Rewrites a client request into the form every node receives.
pub trait RequestCustomizer: Send + Sync + 'static {
    fn customize(&self, request: &SearchRequest) -> SearchRequest;
}

/// Default facet floor sent to nodes.
pub const DEFAULT_FACET_FLOOR: usize = 100;

/// The standard rewrite:
/// - the window becomes `0 / offset + count`, so node-level top-K lists are
///   enough for an exact final page;
/// - every facet's `max_count` is raised to at least `facet_floor`, so the
///   merged counts of the final top values are accurate;
/// - fields needed to sort or group are added to an explicit field selection.
#[derive(Debug, Clone)]
pub struct DefaultCustomizer {
    pub facet_floor: usize,
}

impl Default for DefaultCustomizer {
    fn default() -> Self {
        Self {
            facet_floor: DEFAULT_FACET_FLOOR,
        }
    }
}

impl RequestCustomizer for DefaultCustomizer {
    fn customize(&self, request: &SearchRequest) -> SearchRequest {
        let mut node_request = request.clone();
        node_request.offset = 0;
        node_request.count = request.window_end();

        for facet in node_request.facets.iter_mut() {
            facet.max_count = facet.max_count.max(self.facet_floor);
        }

        if !node_request.fields.is_empty() {
            let mut needed: Vec<String> = request
                .sort
                .iter()
                .map(|s| s.field.clone())
                .collect();
            if let Some(group) = &request.group_by {
                needed.push(group.field.clone());
                needed.extend(group.sort.iter().map(|s| s.field.clone()));
            }
            for field in needed {
                if field != SCORE_FIELD && !node_request.fields.contains(&field) {
                    node_request.fields.push(field);
                }
            }
        }

        node_request
    }
}
