//! Stage timings and failure counters.
//!
//! One [`SearchMetrics`] instance is shared by the broker and the executor of
//! a node. Everything is lock-free; `snapshot` produces the serializable view
//! served on `/metrics`.

use axum::{Extension, Json, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const ENDPOINT_METRICS: &str = "/metrics";

/// Count, total, min and max of one kind of operation, in microseconds.
#[derive(Debug)]
pub struct TimingStats {
    count: AtomicU64,
    total_us: AtomicU64,
    min_us: AtomicU64,
    max_us: AtomicU64,
}

impl Default for TimingStats {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingStats {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_us: AtomicU64::new(0),
            min_us: AtomicU64::new(u64::MAX),
            max_us: AtomicU64::new(0),
        }
    }

    pub fn record(&self, duration: Duration) {
        let us = duration.as_micros().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
        self.min_us.fetch_min(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_us.load(Ordering::Relaxed);
        let min = self.min_us.load(Ordering::Relaxed);
        TimingSnapshot {
            count,
            total_us: total,
            min_us: if min == u64::MAX { 0 } else { min },
            max_us: self.max_us.load(Ordering::Relaxed),
            avg_us: if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingSnapshot {
    pub count: u64,
    pub total_us: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub avg_us: f64,
}

#[derive(Debug, Default)]
pub struct SearchMetrics {
    /// Broker: whole scatter/collect phase, per request.
    pub dispatch: TimingStats,
    /// Executor: one sample per partition that finished in time.
    pub partition_execution: TimingStats,
    /// Node-level and final merges.
    pub merge: TimingStats,
    pub requests: AtomicU64,
    pub partition_timeouts: AtomicU64,
    pub partition_failures: AtomicU64,
    pub node_timeouts: AtomicU64,
    pub node_failures: AtomicU64,
    pub merge_errors: AtomicU64,
    pub unrouted_partitions: AtomicU64,
}

impl SearchMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatch: self.dispatch.snapshot(),
            partition_execution: self.partition_execution.snapshot(),
            merge: self.merge.snapshot(),
            requests: self.requests.load(Ordering::Relaxed),
            partition_timeouts: self.partition_timeouts.load(Ordering::Relaxed),
            partition_failures: self.partition_failures.load(Ordering::Relaxed),
            node_timeouts: self.node_timeouts.load(Ordering::Relaxed),
            node_failures: self.node_failures.load(Ordering::Relaxed),
            merge_errors: self.merge_errors.load(Ordering::Relaxed),
            unrouted_partitions: self.unrouted_partitions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub dispatch: TimingSnapshot,
    pub partition_execution: TimingSnapshot,
    pub merge: TimingSnapshot,
    pub requests: u64,
    pub partition_timeouts: u64,
    pub partition_failures: u64,
    pub node_timeouts: u64,
    pub node_failures: u64,
    pub merge_errors: u64,
    pub unrouted_partitions: u64,
}

pub async fn handle_metrics(
    Extension(metrics): Extension<Arc<SearchMetrics>>,
) -> (StatusCode, Json<MetricsSnapshot>) {
    (StatusCode::OK, Json(metrics.snapshot()))
}
