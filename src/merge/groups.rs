//! Group-by bucket merging.

use super::hits::{compare_hits, merge_ranked};
use crate::search::error::SearchError;
use crate::search::types::{GroupBucket, GroupBy, Hit, SearchRequest, SortField};

use std::collections::BTreeMap;

fn group_sort(request: &SearchRequest, group: &GroupBy) -> Vec<SortField> {
    if group.sort.is_empty() {
        request.effective_sort()
    } else {
        group.sort.clone()
    }
}

/// Combines buckets with the same key: hit totals are summed and the
/// representative hits re-selected under the group ordering.
///
/// Buckets are returned in key order and are never windowed here.
pub fn merge_groups(
    request: &SearchRequest,
    sources: Vec<Vec<GroupBucket>>,
) -> (Vec<GroupBucket>, Vec<SearchError>) {
    let Some(group) = &request.group_by else {
        return (Vec::new(), Vec::new());
    };
    let sort = group_sort(request, group);

    let mut totals: BTreeMap<String, u64> = BTreeMap::new();
    let mut hits: BTreeMap<String, Vec<Vec<Hit>>> = BTreeMap::new();
    let mut overflowed: Vec<String> = Vec::new();

    for bucket in sources.into_iter().flatten() {
        if overflowed.contains(&bucket.value) {
            continue;
        }
        let total = totals.entry(bucket.value.clone()).or_insert(0);
        match total.checked_add(bucket.total_hits) {
            Some(sum) => *total = sum,
            None => {
                totals.remove(&bucket.value);
                hits.remove(&bucket.value);
                overflowed.push(bucket.value);
                continue;
            }
        }
        hits.entry(bucket.value).or_default().push(bucket.hits);
    }

    let errors = overflowed
        .into_iter()
        .map(|value| {
            tracing::warn!("Dropping group '{}': hit count overflow", value);
            SearchError::Merge {
                field: group.field.clone(),
                message: format!("hit count overflow in group '{}'", value),
            }
        })
        .collect();

    let groups = totals
        .into_iter()
        .map(|(value, total_hits)| {
            let sources = hits.remove(&value).unwrap_or_default();
            GroupBucket {
                hits: merge_ranked(&sort, sources, group.max_per_group),
                value,
                total_hits,
            }
        })
        .collect();

    (groups, errors)
}

/// Orders groups by their best hit under the request sort and applies the
/// client window. Only the outermost merge calls this.
pub fn finalize_groups(request: &SearchRequest, mut groups: Vec<GroupBucket>) -> Vec<GroupBucket> {
    let sort = request.effective_sort();
    groups.sort_by(|a, b| match (a.hits.first(), b.hits.first()) {
        (Some(x), Some(y)) => compare_hits(&sort, x, y).then_with(|| a.value.cmp(&b.value)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.value.cmp(&b.value),
    });
    groups
        .into_iter()
        .skip(request.offset)
        .take(request.count)
        .collect()
}
