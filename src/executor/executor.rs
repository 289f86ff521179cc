//! Partition Executor
//!
//! Runs one request over the partitions this node serves. Every partition is
//! an independent task on a bounded pool: a semaphore permit is taken on the
//! async side and the query itself runs on a blocking thread.
//!
//! ## Deadlines
//! Each task is awaited with what is left of the request budget. A task that
//! misses it is reported as a timeout and left to finish on its own; it still
//! releases its snapshot when it completes, and its result is discarded.
//! Partitions that answer in time keep their snapshot until the node-level
//! merge has consumed their contribution.

use super::protocol::NodeStats;
use crate::index::engine::{IndexEngine, SnapshotLease};
use crate::index::pruning::{SegmentPruner, order_for_short_circuit};
use crate::membership::types::NodeId;
use crate::merge::merge_partials;
use crate::metrics::SearchMetrics;
use crate::search::error::SearchError;
use crate::search::types::{PartialResult, PartitionId, SearchRequest};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// A partition's contribution together with the lease on the snapshot it
/// was computed from.
pub(crate) type PartitionOutcome<E> = Result<(PartialResult, SnapshotLease<E>), SearchError>;

pub struct PartitionExecutor<E: IndexEngine> {
    node_id: NodeId,
    engine: Arc<E>,
    pruner: Arc<dyn SegmentPruner>,
    /// Bounds how many partition queries run at once on this node.
    permits: Arc<Semaphore>,
    workers: usize,
    metrics: Arc<SearchMetrics>,
}

impl<E: IndexEngine> PartitionExecutor<E> {
    pub fn new(
        node_id: NodeId,
        engine: Arc<E>,
        pruner: Arc<dyn SegmentPruner>,
        workers: usize,
        metrics: Arc<SearchMetrics>,
    ) -> Arc<Self> {
        let workers = workers.max(1);
        tracing::info!(
            "Partition executor for {} using {} workers and '{}' pruning",
            node_id,
            workers,
            pruner.name()
        );
        Arc::new(Self {
            node_id,
            engine,
            pruner,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            metrics,
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Executes `request` on `partitions` and merges whatever finished within
    /// `budget` into one node-level result. Never trims to the client window.
    pub async fn execute(
        &self,
        request: &SearchRequest,
        partitions: &[PartitionId],
        budget: Duration,
    ) -> PartialResult {
        let start = Instant::now();
        let shared = Arc::new(request.clone());

        let tasks: Vec<(PartitionId, JoinHandle<PartitionOutcome<E>>)> = partitions
            .iter()
            .map(|&partition| (partition, self.spawn_partition(shared.clone(), partition)))
            .collect();

        let budget_ms = budget.as_millis() as u64;
        let mut partials = Vec::with_capacity(tasks.len());
        let mut leases = Vec::with_capacity(tasks.len());

        for (partition, handle) in tasks {
            let remaining = budget.saturating_sub(start.elapsed());
            let outcome = match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(Ok((partial, lease)))) => {
                    tracing::trace!(
                        "Partition {} matched {} docs",
                        partition,
                        partial.total_docs
                    );
                    leases.push(lease);
                    partial
                }
                Ok(Ok(Err(error))) => {
                    SearchMetrics::incr(&self.metrics.partition_failures);
                    tracing::warn!("Partition {} failed: {}", partition, error);
                    PartialResult::from_error(error)
                }
                Ok(Err(join_error)) => {
                    SearchMetrics::incr(&self.metrics.partition_failures);
                    tracing::warn!("Partition {} task aborted: {}", partition, join_error);
                    PartialResult::from_error(SearchError::PartitionExecution {
                        partition,
                        message: format!("task aborted: {}", join_error),
                    })
                }
                Err(_) => {
                    // The handle is dropped here; the task keeps running and
                    // releases its snapshot when it is done.
                    SearchMetrics::incr(&self.metrics.partition_timeouts);
                    tracing::warn!(
                        "Partition {} missed the {}ms budget, discarding its result",
                        partition,
                        budget_ms
                    );
                    PartialResult::from_error(SearchError::partition_timeout(partition, budget_ms))
                }
            };
            partials.push(outcome);
        }

        let merge_start = Instant::now();
        let merged = merge_partials(request, partials);
        self.metrics.merge.record(merge_start.elapsed());
        drop(leases);

        tracing::debug!(
            "Node {} executed {} partitions in {:?} ({} errors)",
            self.node_id,
            partitions.len(),
            start.elapsed(),
            merged.errors.len()
        );
        merged
    }

    fn spawn_partition(
        &self,
        request: Arc<SearchRequest>,
        partition: PartitionId,
    ) -> JoinHandle<PartitionOutcome<E>> {
        let engine = self.engine.clone();
        let pruner = self.pruner.clone();
        let permits = self.permits.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| SearchError::PartitionExecution {
                    partition,
                    message: "executor is shutting down".to_string(),
                })?;

            let blocking = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let start = Instant::now();
                let result = run_partition(engine, pruner.as_ref(), &request, partition);
                metrics.partition_execution.record(start.elapsed());
                result
            });

            match blocking.await {
                Ok(result) => result,
                Err(join_error) => Err(SearchError::PartitionExecution {
                    partition,
                    message: if join_error.is_panic() {
                        "query panicked".to_string()
                    } else {
                        format!("query aborted: {}", join_error)
                    },
                }),
            }
        })
    }

    pub fn stats(&self) -> NodeStats {
        let partitions = self.engine.partition_stats();
        NodeStats {
            node_id: self.node_id.clone(),
            total_docs: partitions.iter().map(|p| p.doc_count).sum(),
            open_snapshots: partitions.iter().map(|p| p.open_snapshots).sum(),
            workers: self.workers,
            busy_workers: self.workers.saturating_sub(self.permits.available_permits()),
            partitions,
        }
    }
}

/// Acquire, prune, order, search. On success the lease is handed back with
/// the result; on every other path, unwinding included, it is released here.
pub(crate) fn run_partition<E: IndexEngine>(
    engine: Arc<E>,
    pruner: &dyn SegmentPruner,
    request: &SearchRequest,
    partition: PartitionId,
) -> PartitionOutcome<E> {
    let lease = SnapshotLease::acquire(engine.clone(), partition).map_err(|e| {
        SearchError::PartitionExecution {
            partition,
            message: e.to_string(),
        }
    })?;

    let mut segments = pruner.prune(request, engine.segments(lease.snapshot()));
    order_for_short_circuit(request, &mut segments);

    let partial = engine
        .search(request, lease.snapshot(), &segments)
        .map_err(|e| SearchError::PartitionExecution {
            partition,
            message: e.to_string(),
        })?;

    Ok((partial, lease))
}
