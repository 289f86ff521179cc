//! Ranked hit merging.

use crate::search::types::{Hit, SortField, SortOrder};

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Orders two hits by `sort`, then by uid ascending.
///
/// The uid tie-break makes the order total, so every merge of the same
/// inputs yields the same sequence no matter how the inputs were split.
pub fn compare_hits(sort: &[SortField], a: &Hit, b: &Hit) -> Ordering {
    for key in sort {
        let ord = a.sort_value(&key.field).total_cmp(&b.sort_value(&key.field));
        let ord = match key.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.uid
        .cmp(&b.uid)
        .then_with(|| a.partition.cmp(&b.partition))
        .then_with(|| a.doc_id.cmp(&b.doc_id))
}

/// Head of one source, ordered so that the max-heap pops the best hit.
struct Cursor<'s> {
    hit: Hit,
    source: usize,
    sort: &'s [SortField],
}

impl Ord for Cursor<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_hits(self.sort, &other.hit, &self.hit)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for Cursor<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Cursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cursor<'_> {}

/// K-way merges already ranked hit lists, keeping the best `limit` hits.
///
/// Sources that arrive out of order are sorted first.
pub fn merge_ranked(sort: &[SortField], sources: Vec<Vec<Hit>>, limit: usize) -> Vec<Hit> {
    let mut iters: Vec<std::vec::IntoIter<Hit>> = sources
        .into_iter()
        .map(|mut hits| {
            if !hits.is_sorted_by(|a, b| compare_hits(sort, a, b) != Ordering::Greater) {
                hits.sort_by(|a, b| compare_hits(sort, a, b));
            }
            hits.into_iter()
        })
        .collect();

    let mut heap = BinaryHeap::with_capacity(iters.len());
    for (source, iter) in iters.iter_mut().enumerate() {
        if let Some(hit) = iter.next() {
            heap.push(Cursor { hit, source, sort });
        }
    }

    let mut merged = Vec::with_capacity(limit.min(1024));
    while merged.len() < limit {
        let Some(Cursor { hit, source, .. }) = heap.pop() else {
            break;
        };
        if let Some(next) = iters[source].next() {
            heap.push(Cursor {
                hit: next,
                source,
                sort,
            });
        }
        merged.push(hit);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::types::FieldValue;

    fn hit(uid: u64, score: f64) -> Hit {
        Hit {
            uid,
            doc_id: uid as u32,
            partition: 0,
            score,
            fields: Default::default(),
        }
    }

    #[test]
    fn test_equal_scores_break_ties_by_uid() {
        let sort = vec![SortField::score_desc()];
        let merged = merge_ranked(
            &sort,
            vec![vec![hit(9, 1.0), hit(3, 0.5)], vec![hit(2, 1.0)]],
            10,
        );
        let uids: Vec<u64> = merged.iter().map(|h| h.uid).collect();
        assert_eq!(uids, vec![2, 9, 3]);
    }

    #[test]
    fn test_missing_sort_field_sorts_first_ascending() {
        let sort = vec![SortField {
            field: "year".to_string(),
            order: SortOrder::Asc,
        }];
        let mut with_year = hit(1, 0.0);
        with_year.fields.insert("year".to_string(), FieldValue::Int(1999));
        let without_year = hit(2, 0.0);

        assert_eq!(compare_hits(&sort, &without_year, &with_year), Ordering::Less);
    }

    #[test]
    fn test_unsorted_source_is_sorted_before_merge() {
        let sort = vec![SortField::score_desc()];
        let merged = merge_ranked(&sort, vec![vec![hit(1, 1.0), hit(2, 3.0), hit(3, 2.0)]], 2);
        let uids: Vec<u64> = merged.iter().map(|h| h.uid).collect();
        assert_eq!(uids, vec![2, 3]);
    }
}
