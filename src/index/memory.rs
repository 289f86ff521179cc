//! In-memory reference index.
//!
//! Each partition is an immutable [`PartitionSnapshot`] made of append-only
//! segments. Adding documents builds a new snapshot that shares the existing
//! segments, so requests holding an older snapshot keep a consistent view and
//! the old snapshot is freed when its last holder releases it.

use super::engine::{IndexEngine, IndexError, PartitionStats, SegmentMeta};
use super::query::Selection;
use crate::merge::hits::compare_hits;
use crate::search::types::{
    FacetAccumulator, FacetKind, FacetSpec, FieldValue, GroupBucket, Hit, PartialResult,
    PartitionId, SearchRequest, SortField, SortOrder,
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_SEGMENT_CAPACITY: usize = 1024;

/// A document as handed to the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub uid: u64,
    #[serde(default)]
    pub score: f64,
    /// Milliseconds since the epoch; used by retention pruning.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

#[derive(Debug)]
struct StoredDoc {
    doc_id: u32,
    doc: Document,
}

#[derive(Debug)]
pub struct Segment {
    meta: SegmentMeta,
    docs: Vec<StoredDoc>,
}

#[derive(Debug)]
pub struct PartitionSnapshot {
    partition: PartitionId,
    generation: u64,
    next_doc_id: u32,
    segments: Vec<Arc<Segment>>,
}

impl PartitionSnapshot {
    fn empty(partition: PartitionId) -> Self {
        Self {
            partition,
            generation: 0,
            next_doc_id: 0,
            segments: Vec::new(),
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn doc_count(&self) -> usize {
        self.segments.iter().map(|s| s.docs.len()).sum()
    }

    fn segment(&self, id: u64) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.meta.id == id)
            .map(|s| s.as_ref())
    }
}

pub struct MemoryIndex {
    partitions: DashMap<PartitionId, Arc<PartitionSnapshot>>,
    leases: DashMap<PartitionId, usize>,
    next_segment_id: AtomicU64,
    segment_capacity: usize,
}

impl MemoryIndex {
    pub fn new() -> Arc<Self> {
        Self::with_segment_capacity(DEFAULT_SEGMENT_CAPACITY)
    }

    pub fn with_segment_capacity(segment_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            partitions: DashMap::new(),
            leases: DashMap::new(),
            next_segment_id: AtomicU64::new(1),
            segment_capacity: segment_capacity.max(1),
        })
    }

    /// Starts serving `partition` with no documents.
    pub fn create_partition(&self, partition: PartitionId) {
        self.partitions
            .entry(partition)
            .or_insert_with(|| Arc::new(PartitionSnapshot::empty(partition)));
    }

    /// Appends `docs` to `partition` as new segments and publishes the new
    /// snapshot. Returns the snapshot generation.
    pub fn add_documents(&self, partition: PartitionId, docs: Vec<Document>) -> u64 {
        let mut entry = self
            .partitions
            .entry(partition)
            .or_insert_with(|| Arc::new(PartitionSnapshot::empty(partition)));

        let current = entry.value().clone();
        let mut segments = current.segments.clone();
        let mut next_doc_id = current.next_doc_id;

        for chunk in docs.chunks(self.segment_capacity) {
            let stored: Vec<StoredDoc> = chunk
                .iter()
                .cloned()
                .map(|doc| {
                    let doc_id = next_doc_id;
                    next_doc_id += 1;
                    StoredDoc { doc_id, doc }
                })
                .collect();
            segments.push(Arc::new(self.seal_segment(stored)));
        }

        let generation = current.generation + 1;
        *entry.value_mut() = Arc::new(PartitionSnapshot {
            partition,
            generation,
            next_doc_id,
            segments,
        });

        tracing::debug!(
            "Partition {} now at generation {} ({} docs added)",
            partition,
            generation,
            docs.len()
        );
        generation
    }

    fn seal_segment(&self, docs: Vec<StoredDoc>) -> Segment {
        let id = self.next_segment_id.fetch_add(1, Ordering::Relaxed);
        let min_timestamp = docs.iter().map(|d| d.doc.timestamp).min().unwrap_or(0);
        let max_timestamp = docs.iter().map(|d| d.doc.timestamp).max().unwrap_or(0);
        let max_score = docs
            .iter()
            .map(|d| d.doc.score)
            .fold(f64::NEG_INFINITY, f64::max);
        Segment {
            meta: SegmentMeta {
                id,
                doc_count: docs.len(),
                min_timestamp,
                max_timestamp,
                max_score,
            },
            docs,
        }
    }

    pub fn partitions(&self) -> Vec<PartitionId> {
        let mut ids: Vec<PartitionId> = self.partitions.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn doc_count(&self, partition: PartitionId) -> usize {
        self.partitions
            .get(&partition)
            .map(|s| s.doc_count())
            .unwrap_or(0)
    }

    /// Snapshots of `partition` currently handed out and not yet released.
    pub fn open_snapshots(&self, partition: PartitionId) -> usize {
        self.leases.get(&partition).map(|c| *c).unwrap_or(0)
    }

    pub fn total_open_snapshots(&self) -> usize {
        self.leases.iter().map(|e| *e.value()).sum()
    }
}

impl IndexEngine for MemoryIndex {
    type Snapshot = PartitionSnapshot;

    fn acquire(&self, partition: PartitionId) -> Result<Arc<PartitionSnapshot>, IndexError> {
        let snapshot = self
            .partitions
            .get(&partition)
            .map(|s| s.value().clone())
            .ok_or(IndexError::UnknownPartition(partition))?;
        *self.leases.entry(partition).or_insert(0) += 1;
        Ok(snapshot)
    }

    fn release(&self, partition: PartitionId, snapshot: Arc<PartitionSnapshot>) {
        if let Some(mut count) = self.leases.get_mut(&partition) {
            *count = count.saturating_sub(1);
        }
        drop(snapshot);
    }

    fn segments(&self, snapshot: &PartitionSnapshot) -> Vec<SegmentMeta> {
        snapshot.segments.iter().map(|s| s.meta.clone()).collect()
    }

    fn search(
        &self,
        request: &SearchRequest,
        snapshot: &PartitionSnapshot,
        segments: &[SegmentMeta],
    ) -> Result<PartialResult, IndexError> {
        let selection = Selection::parse(&request.query)?;
        let sort = request.effective_sort();
        let keep = request.window_end();
        let score_ordered = sort
            .first()
            .is_some_and(|s| s.is_score() && s.order == SortOrder::Desc);

        let mut collector = Collector::new(request, &sort);
        let mut top: Vec<Hit> = Vec::with_capacity(keep.min(1024));

        for meta in segments {
            let Some(segment) = snapshot.segment(meta.id) else {
                continue;
            };

            if top.len() >= keep {
                top.sort_by(|a, b| compare_hits(&sort, a, b));
                top.truncate(keep);
            }
            // Segments arrive best-first for score ordering: once the top-K is
            // full and this segment cannot beat its weakest hit, only counts
            // are still needed from it.
            let collect_hits = !(score_ordered
                && top.len() >= keep
                && top.last().is_some_and(|weakest| meta.max_score < weakest.score));

            for stored in &segment.docs {
                if !selection.matches(&stored.doc) {
                    continue;
                }
                let hit = make_hit(snapshot.partition, stored, &request.fields);
                collector.observe(&stored.doc, &hit);
                if collect_hits {
                    top.push(hit);
                }
            }
        }

        top.sort_by(|a, b| compare_hits(&sort, a, b));
        top.truncate(keep);

        let (total_docs, facets, groups) = collector.finish();
        Ok(PartialResult {
            hits: top,
            total_docs,
            facets,
            groups,
            errors: Vec::new(),
        })
    }

    fn partition_stats(&self) -> Vec<PartitionStats> {
        let mut stats: Vec<PartitionStats> = self
            .partitions
            .iter()
            .map(|entry| PartitionStats {
                partition: *entry.key(),
                doc_count: entry.value().doc_count() as u64,
                segments: entry.value().segments.len(),
                open_snapshots: self.open_snapshots(*entry.key()),
            })
            .collect();
        stats.sort_by_key(|s| s.partition);
        stats
    }
}

fn make_hit(partition: PartitionId, stored: &StoredDoc, fields: &[String]) -> Hit {
    let selected = if fields.is_empty() {
        stored.doc.fields.clone()
    } else {
        fields
            .iter()
            .filter_map(|f| stored.doc.fields.get(f).map(|v| (f.clone(), v.clone())))
            .collect()
    };
    Hit {
        uid: stored.doc.uid,
        doc_id: stored.doc_id,
        partition,
        score: stored.doc.score,
        fields: selected,
    }
}

/// Accumulates totals, facets and groups over every matching document.
struct Collector<'a> {
    total: u64,
    facet_specs: &'a [FacetSpec],
    facets: BTreeMap<String, FacetAccumulator>,
    group_field: Option<&'a str>,
    group_limit: usize,
    group_sort: Vec<SortField>,
    groups: BTreeMap<String, GroupBucket>,
}

impl<'a> Collector<'a> {
    fn new(request: &'a SearchRequest, sort: &[SortField]) -> Self {
        let facets = request
            .facets
            .iter()
            .map(|spec| {
                let acc = match spec.kind {
                    FacetKind::Terms => FacetAccumulator::Terms {
                        counts: BTreeMap::new(),
                    },
                    FacetKind::Histogram { interval } => FacetAccumulator::Histogram {
                        interval,
                        buckets: BTreeMap::new(),
                    },
                };
                (spec.field.clone(), acc)
            })
            .collect();

        let (group_field, group_limit, group_sort) = match &request.group_by {
            Some(group) => (
                Some(group.field.as_str()),
                group.max_per_group,
                if group.sort.is_empty() {
                    sort.to_vec()
                } else {
                    group.sort.clone()
                },
            ),
            None => (None, 0, Vec::new()),
        };

        Self {
            total: 0,
            facet_specs: &request.facets,
            facets,
            group_field,
            group_limit,
            group_sort,
            groups: BTreeMap::new(),
        }
    }

    fn observe(&mut self, doc: &Document, hit: &Hit) {
        self.total += 1;

        for (field, acc) in self.facets.iter_mut() {
            let Some(value) = doc.fields.get(field) else {
                continue;
            };
            match acc {
                FacetAccumulator::Terms { counts } => {
                    *counts.entry(value.label()).or_insert(0) += 1;
                }
                FacetAccumulator::Histogram { interval, buckets } => {
                    if let Some(v) = value.as_f64() {
                        let bucket = (v / *interval).floor() as i64;
                        *buckets.entry(bucket).or_insert(0) += 1;
                    }
                }
            }
        }

        if let Some(field) = self.group_field {
            let key = doc
                .fields
                .get(field)
                .map(FieldValue::label)
                .unwrap_or_else(|| FieldValue::Null.label());
            let bucket = self.groups.entry(key.clone()).or_insert_with(|| GroupBucket {
                value: key,
                total_hits: 0,
                hits: Vec::new(),
            });
            bucket.total_hits += 1;
            bucket.hits.push(hit.clone());
            if bucket.hits.len() > self.group_limit {
                bucket.hits.sort_by(|a, b| compare_hits(&self.group_sort, a, b));
                bucket.hits.truncate(self.group_limit);
            }
        }
    }

    fn finish(mut self) -> (u64, BTreeMap<String, FacetAccumulator>, Vec<GroupBucket>) {
        // Per-partition facet lists are capped at the requested size; callers
        // that need exact merged counts inflate `max_count` beforehand.
        for spec in self.facet_specs {
            if let Some(FacetAccumulator::Terms { counts }) = self.facets.get_mut(&spec.field)
                && counts.len() > spec.max_count
            {
                let mut ranked: Vec<(String, u64)> = std::mem::take(counts).into_iter().collect();
                ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                ranked.truncate(spec.max_count);
                *counts = ranked.into_iter().collect();
            }
        }

        let groups = self
            .groups
            .into_values()
            .map(|mut bucket| {
                bucket.hits.sort_by(|a, b| compare_hits(&self.group_sort, a, b));
                bucket
            })
            .collect();

        (self.total, self.facets, groups)
    }
}
