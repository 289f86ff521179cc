//! Facet accumulation across partial results.

use crate::search::error::SearchError;
use crate::search::types::{FacetAccumulator, FacetCount, SearchRequest};

use std::collections::{BTreeMap, BTreeSet};

/// Sums facet accumulators field by field.
///
/// A field whose accumulators disagree in shape, or whose counts overflow,
/// is dropped from the output and reported once as a `Merge` error.
pub fn merge_facets(
    sources: Vec<BTreeMap<String, FacetAccumulator>>,
) -> (BTreeMap<String, FacetAccumulator>, Vec<SearchError>) {
    let mut merged: BTreeMap<String, FacetAccumulator> = BTreeMap::new();
    let mut failed: BTreeMap<String, String> = BTreeMap::new();

    for source in sources {
        for (field, acc) in source {
            if failed.contains_key(&field) {
                continue;
            }
            let outcome = match merged.remove(&field) {
                None => Ok(acc),
                Some(current) => combine(current, acc),
            };
            match outcome {
                Ok(combined) => {
                    merged.insert(field, combined);
                }
                Err(message) => {
                    tracing::warn!("Dropping facet '{}': {}", field, message);
                    failed.insert(field, message);
                }
            }
        }
    }

    let errors = failed
        .into_iter()
        .map(|(field, message)| SearchError::Merge { field, message })
        .collect();
    (merged, errors)
}

fn combine(left: FacetAccumulator, right: FacetAccumulator) -> Result<FacetAccumulator, String> {
    match (left, right) {
        (FacetAccumulator::Terms { mut counts }, FacetAccumulator::Terms { counts: other }) => {
            for (value, count) in other {
                let slot = counts.entry(value).or_insert(0);
                *slot = slot
                    .checked_add(count)
                    .ok_or_else(|| "facet count overflow".to_string())?;
            }
            Ok(FacetAccumulator::Terms { counts })
        }
        (
            FacetAccumulator::Histogram {
                interval,
                mut buckets,
            },
            FacetAccumulator::Histogram {
                interval: other_interval,
                buckets: other,
            },
        ) => {
            if interval != other_interval {
                return Err(format!(
                    "histogram interval mismatch ({} vs {})",
                    interval, other_interval
                ));
            }
            for (bucket, count) in other {
                let slot = buckets.entry(bucket).or_insert(0);
                *slot = slot
                    .checked_add(count)
                    .ok_or_else(|| "histogram count overflow".to_string())?;
            }
            Ok(FacetAccumulator::Histogram { interval, buckets })
        }
        _ => Err("facet kinds differ between sources".to_string()),
    }
}

/// Turns merged accumulators into the client-facing lists.
///
/// Terms are ranked by count descending then value ascending and cut to the
/// request's `max_count`. Histogram buckets keep their natural ascending order.
/// Both drop values under `min_hit_count`.
pub fn finalize_facets(
    request: &SearchRequest,
    accumulators: BTreeMap<String, FacetAccumulator>,
) -> BTreeMap<String, Vec<FacetCount>> {
    let requested: BTreeSet<&str> = request.facets.iter().map(|f| f.field.as_str()).collect();

    accumulators
        .into_iter()
        .filter(|(field, _)| requested.contains(field.as_str()))
        .filter_map(|(field, acc)| {
            let spec = request.facet_spec(&field)?;
            let list = match acc {
                FacetAccumulator::Terms { counts } => {
                    let mut ranked: Vec<FacetCount> = counts
                        .into_iter()
                        .filter(|(_, count)| *count >= spec.min_hit_count)
                        .map(|(value, count)| FacetCount { value, count })
                        .collect();
                    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
                    ranked.truncate(spec.max_count);
                    ranked
                }
                FacetAccumulator::Histogram { interval, buckets } => buckets
                    .into_iter()
                    .filter(|(_, count)| *count >= spec.min_hit_count)
                    .map(|(bucket, count)| FacetCount {
                        value: (bucket as f64 * interval).to_string(),
                        count,
                    })
                    .collect(),
            };
            Some((field, list))
        })
        .collect()
}
