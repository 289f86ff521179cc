//! Index Module Tests
//!
//! ## Test Scopes
//! - **Snapshots**: copy-on-write publication and lease accounting.
//! - **Selection**: JSON selection payloads and malformed input.
//! - **Collection**: top-K, facets, groups and segment short-circuiting.

#[cfg(test)]
mod tests {
    use crate::index::engine::{IndexEngine, IndexError, SnapshotLease};
    use crate::index::memory::{Document, MemoryIndex};
    use crate::index::pruning::{KeepAll, SegmentPruner, order_for_short_circuit};
    use crate::search::types::{
        FacetAccumulator, FacetKind, FacetSpec, FieldValue, GroupBy, SearchRequest, SortField,
        SortOrder,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn doc(uid: u64, score: f64, color: &str, price: i64) -> Document {
        let mut fields = BTreeMap::new();
        fields.insert("color".to_string(), FieldValue::from(color));
        fields.insert("price".to_string(), FieldValue::Int(price));
        Document {
            uid,
            score,
            timestamp: 0,
            fields,
        }
    }

    fn catalog() -> Vec<Document> {
        vec![
            doc(1, 5.0, "red", 10),
            doc(2, 9.0, "blue", 25),
            doc(3, 1.0, "red", 31),
            doc(4, 7.0, "green", 12),
            doc(5, 3.0, "red", 44),
        ]
    }

    fn run(index: &std::sync::Arc<MemoryIndex>, partition: u32, request: &SearchRequest) -> crate::search::types::PartialResult {
        let lease = SnapshotLease::acquire(index.clone(), partition).unwrap();
        let mut segments = KeepAll.prune(request, index.segments(lease.snapshot()));
        order_for_short_circuit(request, &mut segments);
        index.search(request, lease.snapshot(), &segments).unwrap()
    }

    // ============================================================
    // SNAPSHOTS
    // ============================================================

    #[test]
    fn test_lease_releases_on_drop() {
        let index = MemoryIndex::new();
        index.add_documents(1, catalog());

        {
            let _lease = SnapshotLease::acquire(index.clone(), 1).unwrap();
            assert_eq!(index.open_snapshots(1), 1);
        }

        assert_eq!(index.open_snapshots(1), 0);
    }

    #[test]
    fn test_lease_releases_during_unwind() {
        let index = MemoryIndex::new();
        index.add_documents(1, catalog());

        let cloned = index.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _lease = SnapshotLease::acquire(cloned, 1).unwrap();
            panic!("query blew up");
        }));

        assert!(outcome.is_err());
        assert_eq!(index.open_snapshots(1), 0);
    }

    #[test]
    fn test_unknown_partition_is_an_error() {
        let index = MemoryIndex::new();
        let result = SnapshotLease::acquire(index.clone(), 9);
        assert!(matches!(result, Err(IndexError::UnknownPartition(9))));
        assert_eq!(index.total_open_snapshots(), 0);
    }

    #[test]
    fn test_held_snapshot_is_not_affected_by_new_documents() {
        let index = MemoryIndex::new();
        index.add_documents(1, catalog());
        let request = SearchRequest::default();

        let lease = SnapshotLease::acquire(index.clone(), 1).unwrap();
        let generation = index.add_documents(1, vec![doc(6, 50.0, "red", 1)]);
        assert_eq!(generation, 2);

        let segments = index.segments(lease.snapshot());
        let old = index.search(&request, lease.snapshot(), &segments).unwrap();
        assert_eq!(old.total_docs, 5);
        drop(lease);

        let fresh = run(&index, 1, &request);
        assert_eq!(fresh.total_docs, 6);
        assert_eq!(fresh.hits[0].uid, 6);
    }

    #[test]
    fn test_documents_are_split_into_segments() {
        let index = MemoryIndex::with_segment_capacity(2);
        index.add_documents(1, catalog());

        let lease = SnapshotLease::acquire(index.clone(), 1).unwrap();
        assert_eq!(index.segments(lease.snapshot()).len(), 3);
        assert_eq!(index.doc_count(1), 5);
    }

    // ============================================================
    // SELECTION
    // ============================================================

    #[test]
    fn test_term_and_range_selection() {
        let index = MemoryIndex::new();
        index.add_documents(1, catalog());

        let request = SearchRequest::new(json!({"all": [
            {"term": {"field": "color", "value": "red"}},
            {"range": {"field": "price", "gte": 20}}
        ]}));
        let result = run(&index, 1, &request);

        let uids: Vec<u64> = result.hits.iter().map(|h| h.uid).collect();
        assert_eq!(uids, vec![5, 3]);
        assert_eq!(result.total_docs, 2);
    }

    #[test]
    fn test_match_all_string_payload() {
        let index = MemoryIndex::new();
        index.add_documents(1, catalog());

        let result = run(&index, 1, &SearchRequest::new(json!("match_all")));
        assert_eq!(result.total_docs, 5);
    }

    #[test]
    fn test_malformed_selection_is_invalid_query() {
        let index = MemoryIndex::new();
        index.add_documents(1, catalog());

        let request = SearchRequest::new(json!({"fuzzy": "red"}));
        let lease = SnapshotLease::acquire(index.clone(), 1).unwrap();
        let segments = index.segments(lease.snapshot());
        let result = index.search(&request, lease.snapshot(), &segments);

        assert!(matches!(result, Err(IndexError::InvalidQuery(_))));
    }

    // ============================================================
    // COLLECTION
    // ============================================================

    #[test]
    fn test_keeps_window_end_hits_in_sort_order() {
        let index = MemoryIndex::with_segment_capacity(2);
        index.add_documents(1, catalog());

        let request = SearchRequest::default().with_window(1, 2);
        let result = run(&index, 1, &request);

        let scores: Vec<f64> = result.hits.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![9.0, 7.0, 5.0]);
        assert_eq!(result.total_docs, 5);
    }

    #[test]
    fn test_field_sort_ascending() {
        let index = MemoryIndex::new();
        index.add_documents(1, catalog());

        let request = SearchRequest::default().with_sort(vec![SortField {
            field: "price".to_string(),
            order: SortOrder::Asc,
        }]);
        let result = run(&index, 1, &request);

        let uids: Vec<u64> = result.hits.iter().map(|h| h.uid).collect();
        assert_eq!(uids, vec![1, 4, 2, 3, 5]);
    }

    #[test]
    fn test_short_circuit_still_counts_every_match() {
        let index = MemoryIndex::with_segment_capacity(1);
        index.add_documents(1, (0..20).map(|i| doc(i, i as f64, "red", 1)).collect());

        let request = SearchRequest::default().with_window(0, 3);
        let result = run(&index, 1, &request);

        let uids: Vec<u64> = result.hits.iter().map(|h| h.uid).collect();
        assert_eq!(uids, vec![19, 18, 17]);
        assert_eq!(result.total_docs, 20);
    }

    #[test]
    fn test_terms_and_histogram_facets() {
        let index = MemoryIndex::new();
        index.add_documents(1, catalog());

        let mut request = SearchRequest::default();
        request.facets = vec![
            FacetSpec::terms("color", 10),
            FacetSpec {
                field: "price".to_string(),
                kind: FacetKind::Histogram { interval: 20.0 },
                max_count: 10,
                min_hit_count: 0,
            },
        ];
        let result = run(&index, 1, &request);

        let Some(FacetAccumulator::Terms { counts }) = result.facets.get("color") else {
            panic!("missing color facet");
        };
        assert_eq!(counts.get("red"), Some(&3));
        assert_eq!(counts.get("blue"), Some(&1));

        let Some(FacetAccumulator::Histogram { buckets, .. }) = result.facets.get("price") else {
            panic!("missing price facet");
        };
        assert_eq!(buckets.get(&0), Some(&2));
        assert_eq!(buckets.get(&1), Some(&2));
        assert_eq!(buckets.get(&2), Some(&1));
    }

    #[test]
    fn test_terms_facet_trimmed_per_partition() {
        let index = MemoryIndex::new();
        index.add_documents(1, catalog());

        let mut request = SearchRequest::default();
        request.facets = vec![FacetSpec::terms("color", 1)];
        let result = run(&index, 1, &request);

        let Some(FacetAccumulator::Terms { counts }) = result.facets.get("color") else {
            panic!("missing color facet");
        };
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get("red"), Some(&3));
    }

    #[test]
    fn test_group_by_keeps_best_hits_per_group() {
        let index = MemoryIndex::new();
        index.add_documents(1, catalog());

        let mut request = SearchRequest::default();
        request.group_by = Some(GroupBy {
            field: "color".to_string(),
            max_per_group: 2,
            sort: Vec::new(),
        });
        let result = run(&index, 1, &request);

        let red = result.groups.iter().find(|g| g.value == "red").unwrap();
        assert_eq!(red.total_hits, 3);
        let uids: Vec<u64> = red.hits.iter().map(|h| h.uid).collect();
        assert_eq!(uids, vec![1, 5]);
    }

    #[test]
    fn test_field_selection_limits_hit_fields() {
        let index = MemoryIndex::new();
        index.add_documents(1, catalog());

        let mut request = SearchRequest::default();
        request.fields = vec!["color".to_string()];
        let result = run(&index, 1, &request);

        assert!(result.hits.iter().all(|h| h.fields.len() == 1 && h.fields.contains_key("color")));
    }
}
