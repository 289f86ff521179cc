//! Result Merger Module
//!
//! Pure functions that combine partial results from partitions or nodes into
//! one result whose ranking and counts match a single-machine execution.
//!
//! ## Core Rules
//! - **Widen, then trim once**: intermediate merges keep `offset + count` hits;
//!   only [`merge_final`] applies the client window.
//! - **Deterministic order**: hits are ranked by the request sort with a uid
//!   tie-break, so any split of the same data merges to the same sequence.
//! - **Degrade per field**: a facet or group that cannot be combined is
//!   omitted with a `Merge` error; everything else is still merged.

pub mod facets;
pub mod groups;
pub mod hits;

use crate::search::types::{PartialResult, SearchRequest, SearchResult};

/// Combines partial results without applying the client window.
///
/// Used by the node to fold partition results and by anything else that
/// produces input for a later merge.
pub fn merge_partials(request: &SearchRequest, partials: Vec<PartialResult>) -> PartialResult {
    let sort = request.effective_sort();

    let mut hit_sources = Vec::with_capacity(partials.len());
    let mut facet_sources = Vec::with_capacity(partials.len());
    let mut group_sources = Vec::with_capacity(partials.len());
    let mut errors = Vec::new();
    let mut total_docs: u64 = 0;

    for partial in partials {
        total_docs = total_docs.saturating_add(partial.total_docs);
        hit_sources.push(partial.hits);
        facet_sources.push(partial.facets);
        group_sources.push(partial.groups);
        errors.extend(partial.errors);
    }

    let hits = hits::merge_ranked(&sort, hit_sources, request.window_end());
    let (facets, facet_errors) = facets::merge_facets(facet_sources);
    let (groups, group_errors) = groups::merge_groups(request, group_sources);
    errors.extend(facet_errors);
    errors.extend(group_errors);

    PartialResult {
        hits,
        total_docs,
        facets,
        groups,
        errors,
    }
}

/// Outermost merge: combines, then windows hits and groups to
/// `[offset, offset + count)` and finalizes facet lists.
///
/// `request` must be the caller's original request, not a widened copy.
pub fn merge_final(request: &SearchRequest, partials: Vec<PartialResult>) -> SearchResult {
    finalize(request, merge_partials(request, partials))
}

/// Applies the client window to an already merged result.
pub fn finalize(request: &SearchRequest, merged: PartialResult) -> SearchResult {
    let hits = merged
        .hits
        .into_iter()
        .skip(request.offset)
        .take(request.count)
        .collect();

    SearchResult {
        request_id: request.request_id.clone(),
        hits,
        total_docs: merged.total_docs,
        facets: facets::finalize_facets(request, merged.facets),
        groups: groups::finalize_groups(request, merged.groups),
        elapsed_ms: 0,
        errors: merged.errors,
    }
}
