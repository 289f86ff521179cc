//! Error kinds reported inside results, plus request validation errors.
//!
//! `SearchError` values never cross the broker boundary as failures; they are
//! collected into the `errors` list of a result so callers always get a
//! well-formed (possibly degraded) answer.

use super::types::PartitionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What missed its deadline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutSource {
    Partition(PartitionId),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchError {
    /// The scatter/collect phase produced nothing usable.
    #[error("gather failed: {message}")]
    Gather { message: String },

    /// A partition, or the node serving it, did not answer within the
    /// remaining budget.
    #[error("{origin:?} timed out after {budget_ms}ms")]
    ExecutionTimeout {
        origin: TimeoutSource,
        budget_ms: u64,
    },

    /// A partition's query failed; its contribution is dropped.
    #[error("partition {partition} failed: {message}")]
    PartitionExecution {
        partition: PartitionId,
        message: String,
    },

    /// One facet, group or field could not be combined and was omitted.
    #[error("merge of '{field}' failed: {message}")]
    Merge { field: String, message: String },

    /// Nothing to dispatch: the target set was empty or entirely unrouted.
    #[error("no partitions available: {message}")]
    NoPartitions { message: String },
}

impl SearchError {
    pub fn partition_timeout(partition: PartitionId, budget_ms: u64) -> Self {
        SearchError::ExecutionTimeout {
            origin: TimeoutSource::Partition(partition),
            budget_ms,
        }
    }

    /// Partition this error is attributed to, if any.
    pub fn partition(&self) -> Option<PartitionId> {
        match self {
            SearchError::ExecutionTimeout {
                origin: TimeoutSource::Partition(p),
                ..
            } => Some(*p),
            SearchError::PartitionExecution { partition, .. } => Some(*partition),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SearchError::ExecutionTimeout { .. })
    }
}

/// Caller misuse detected before any dispatch happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("count must be greater than zero")]
    EmptyWindow,

    #[error("window offset={offset} count={count} exceeds {max}")]
    WindowTooLarge {
        offset: usize,
        count: usize,
        max: usize,
    },

    #[error("invalid facet '{field}': {reason}")]
    InvalidFacet { field: String, reason: String },

    #[error("group-by on '{field}' must keep at least one hit per group")]
    InvalidGroupBy { field: String },
}
