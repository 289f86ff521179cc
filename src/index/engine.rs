//! Index engine contract.
//!
//! The scatter-gather layer never looks inside a partition's index. It only
//! needs to acquire a reference-counted snapshot, list the snapshot's
//! segments for pruning, run a search against it and release it again.

use crate::search::types::{PartialResult, PartitionId, SearchRequest};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("partition {0} is not served by this node")]
    UnknownPartition(PartitionId),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("index failure: {0}")]
    Internal(String),
}

/// Pruning-relevant summary of one segment in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: u64,
    pub doc_count: usize,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub max_score: f64,
}

/// Per-partition figures reported by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub partition: PartitionId,
    pub doc_count: u64,
    pub segments: usize,
    pub open_snapshots: usize,
}

pub trait IndexEngine: Send + Sync + 'static {
    /// Live, queryable state of one partition. Shared between concurrent
    /// requests and reclaimed once the last holder lets go.
    type Snapshot: Send + Sync + 'static;

    fn acquire(&self, partition: PartitionId) -> Result<Arc<Self::Snapshot>, IndexError>;

    fn release(&self, partition: PartitionId, snapshot: Arc<Self::Snapshot>);

    fn segments(&self, snapshot: &Self::Snapshot) -> Vec<SegmentMeta>;

    /// Runs `request` over `segments` of `snapshot`, in the given order.
    ///
    /// Must return at most `request.window_end()` hits, sorted by the
    /// request's ordering.
    fn search(
        &self,
        request: &SearchRequest,
        snapshot: &Self::Snapshot,
        segments: &[SegmentMeta],
    ) -> Result<PartialResult, IndexError>;

    /// Figures for every partition this engine serves, in partition order.
    fn partition_stats(&self) -> Vec<PartitionStats>;
}

/// Scoped hold on a partition snapshot.
///
/// Releases the snapshot back to the engine when dropped, on every exit path
/// including unwinding.
pub struct SnapshotLease<E: IndexEngine> {
    engine: Arc<E>,
    partition: PartitionId,
    snapshot: Option<Arc<E::Snapshot>>,
}

impl<E: IndexEngine> SnapshotLease<E> {
    pub fn acquire(engine: Arc<E>, partition: PartitionId) -> Result<Self, IndexError> {
        let snapshot = engine.acquire(partition)?;
        Ok(Self {
            engine,
            partition,
            snapshot: Some(snapshot),
        })
    }

    pub fn snapshot(&self) -> &E::Snapshot {
        // Only `Drop` takes the snapshot out.
        self.snapshot
            .as_deref()
            .unwrap_or_else(|| unreachable!("snapshot lease used after release"))
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }
}

impl<E: IndexEngine> Drop for SnapshotLease<E> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.engine.release(self.partition, snapshot);
            tracing::trace!("Released snapshot of partition {}", self.partition);
        }
    }
}
