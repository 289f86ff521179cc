//! Cluster-info broker: the same scatter/gather skeleton as document search,
//! fanning a stats call out to every member instead of a query.

use super::scatter::{BoxFuture, CallFn, NodeFailure, ScatterGather};
use super::transport::NodeTransport;
use crate::executor::protocol::NodeStats;
use crate::membership::types::{NodeId, NodeInfo};
use crate::routing::router::PartitionRouter;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub routing_version: u64,
    /// Answering nodes, ordered by id.
    pub nodes: Vec<NodeStats>,
    /// Distinct partitions served by answering nodes.
    pub partitions: usize,
    /// Documents across distinct partitions. Replicas are counted once.
    pub total_docs: u64,
    pub unreachable: Vec<NodeId>,
    pub elapsed_ms: u64,
}

impl ClusterStats {
    fn from_node(stats: NodeStats) -> Self {
        Self::combine(vec![Self {
            nodes: vec![stats],
            ..Default::default()
        }])
    }

    fn combine(parts: Vec<ClusterStats>) -> Self {
        let mut nodes: Vec<NodeStats> = parts.into_iter().flat_map(|p| p.nodes).collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let mut per_partition: BTreeMap<u32, u64> = BTreeMap::new();
        for node in &nodes {
            for p in &node.partitions {
                let docs = per_partition.entry(p.partition).or_insert(0);
                *docs = (*docs).max(p.doc_count);
            }
        }

        Self {
            routing_version: 0,
            partitions: per_partition.len(),
            total_docs: per_partition.values().sum(),
            nodes,
            unreachable: Vec::new(),
            elapsed_ms: 0,
        }
    }
}

pub struct ClusterInfoBroker {
    router: Arc<PartitionRouter>,
    transport: Arc<dyn NodeTransport>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl ClusterInfoBroker {
    pub fn new(
        router: Arc<PartitionRouter>,
        transport: Arc<dyn NodeTransport>,
        concurrency: usize,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            router,
            transport,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
        })
    }

    pub async fn cluster_info(&self) -> ClusterStats {
        let start = Instant::now();
        let table = self.router.snapshot();
        let targets: Vec<(NodeInfo, ())> = table.nodes().map(|n| (n.clone(), ())).collect();

        let scatter = ScatterGather::new(self.permits.clone(), ClusterStats::combine, ClusterStats::default);
        let transport = self.transport.clone();
        let call: CallFn<(), ClusterStats> = Arc::new(move |node: NodeInfo, _: ()| {
            let transport = transport.clone();
            Box::pin(async move { transport.stats(&node).await.map(ClusterStats::from_node) })
                as BoxFuture<anyhow::Result<ClusterStats>>
        });

        let gathered = scatter.run(targets, call, start + self.timeout).await;

        let mut stats = gathered.result;
        stats.routing_version = table.version();
        stats.unreachable = gathered
            .failures
            .iter()
            .map(|(node, failure)| {
                if let NodeFailure::Failed { message } = failure {
                    tracing::debug!("Stats from {} unavailable: {}", node.id, message);
                }
                node.id.clone()
            })
            .collect();
        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        stats
    }
}
