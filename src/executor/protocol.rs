//! Network Protocol Definitions
//!
//! DTOs exchanged between a broker and the executors on other nodes.

use crate::index::engine::PartitionStats;
use crate::membership::types::NodeId;
use crate::search::types::{PartitionId, SearchRequest};
use serde::{Deserialize, Serialize};

pub const ENDPOINT_EXECUTE: &str = "/internal/execute";
pub const ENDPOINT_NODE_STATS: &str = "/internal/stats";

/// One node's share of a request: the already customized request plus the
/// partitions this node was picked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSearchRequest {
    pub request: SearchRequest,
    pub partitions: Vec<PartitionId>,
    /// Time left for the node to answer. Falls back to the node's configured
    /// partition budget when absent.
    #[serde(default)]
    pub budget_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub node_id: NodeId,
    pub partitions: Vec<PartitionStats>,
    pub total_docs: u64,
    pub open_snapshots: usize,
    pub workers: usize,
    pub busy_workers: usize,
}
