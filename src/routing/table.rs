use super::ring::{HashRing, route_token};
use crate::membership::types::{MembershipView, NodeId, NodeInfo};
use crate::search::types::PartitionId;

use std::collections::{BTreeMap, BTreeSet};

/// Immutable routing state derived from one membership view.
///
/// Holds, per partition, the sorted list of owning nodes and a hash ring built
/// only from those owners. Because each ring contains nothing but the
/// partition's own replicas, a node joining or leaving can only change picks
/// for partitions it serves.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    version: u64,
    nodes: BTreeMap<NodeId, NodeInfo>,
    owners: BTreeMap<PartitionId, Vec<NodeId>>,
    rings: BTreeMap<PartitionId, HashRing>,
}

impl RoutingTable {
    /// Deterministic: the same view always yields the same table.
    pub fn build(view: &MembershipView, virtual_nodes: u32) -> Self {
        let mut owners: BTreeMap<PartitionId, Vec<NodeId>> = BTreeMap::new();
        for node in view.members.values() {
            for &partition in &node.partitions {
                owners.entry(partition).or_default().push(node.id.clone());
            }
        }
        for list in owners.values_mut() {
            list.sort();
            list.dedup();
        }

        let rings = owners
            .iter()
            .map(|(&partition, nodes)| (partition, HashRing::build(nodes, virtual_nodes)))
            .collect();

        Self {
            version: view.version,
            nodes: view.members.clone(),
            owners,
            rings,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Picks the replica of `partition` responsible for `routing_key`.
    ///
    /// `None` means no live node serves the partition: a coverage gap, not an
    /// error.
    pub fn route(&self, partition: PartitionId, routing_key: &[u8]) -> Option<&NodeInfo> {
        let ring = self.rings.get(&partition)?;
        let node_id = ring.lookup(route_token(routing_key, partition))?;
        self.nodes.get(node_id)
    }

    pub fn partitions(&self) -> BTreeSet<PartitionId> {
        self.owners.keys().copied().collect()
    }

    pub fn owners(&self, partition: PartitionId) -> &[NodeId] {
        self.owners
            .get(&partition)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeInfo> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }
}
