//! Segment selection applied before a partition query runs.

use super::engine::SegmentMeta;
use crate::search::types::{SearchRequest, SortOrder};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub trait SegmentPruner: Send + Sync + 'static {
    /// Returns the segments worth searching for `request`.
    fn prune(&self, request: &SearchRequest, segments: Vec<SegmentMeta>) -> Vec<SegmentMeta>;

    fn name(&self) -> &'static str;
}

/// Searches every segment.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepAll;

impl SegmentPruner for KeepAll {
    fn prune(&self, _request: &SearchRequest, segments: Vec<SegmentMeta>) -> Vec<SegmentMeta> {
        segments
    }

    fn name(&self) -> &'static str {
        "keep_all"
    }
}

/// Drops segments whose newest document is older than the retention window.
#[derive(Debug, Clone)]
pub struct RetentionPruner {
    retention: Duration,
    now_ms: fn() -> i64,
}

impl RetentionPruner {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            now_ms: wall_clock_ms,
        }
    }

    /// Uses `now_ms` instead of the wall clock.
    pub fn with_clock(retention: Duration, now_ms: fn() -> i64) -> Self {
        Self { retention, now_ms }
    }

    fn cutoff(&self) -> i64 {
        (self.now_ms)().saturating_sub(self.retention.as_millis() as i64)
    }
}

impl SegmentPruner for RetentionPruner {
    fn prune(&self, _request: &SearchRequest, segments: Vec<SegmentMeta>) -> Vec<SegmentMeta> {
        let cutoff = self.cutoff();
        let before = segments.len();
        let kept: Vec<SegmentMeta> = segments
            .into_iter()
            .filter(|s| s.max_timestamp >= cutoff)
            .collect();
        if kept.len() < before {
            tracing::trace!("Retention pruned {} of {} segments", before - kept.len(), before);
        }
        kept
    }

    fn name(&self) -> &'static str {
        "retention"
    }
}

/// Orders segments so that collection can stop early.
///
/// Score-descending requests visit the segments with the best possible score
/// first; every other ordering visits larger segments first. Segment ids break
/// ties so the order is deterministic.
pub fn order_for_short_circuit(request: &SearchRequest, segments: &mut [SegmentMeta]) {
    let by_score = request
        .effective_sort()
        .first()
        .is_some_and(|s| s.is_score() && s.order == SortOrder::Desc);

    if by_score {
        segments.sort_by(|a, b| {
            b.max_score
                .total_cmp(&a.max_score)
                .then_with(|| a.id.cmp(&b.id))
        });
    } else {
        segments.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then_with(|| a.id.cmp(&b.id)));
    }
}

fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
