use crate::search::types::PartitionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Represents a single member in the cluster view.
///
/// A node serves a fixed set of partitions for as long as it stays in a view;
/// changing the set requires publishing a new view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub partitions: Vec<PartitionId>,
}

impl NodeInfo {
    pub fn new(id: impl Into<NodeId>, addr: SocketAddr, partitions: Vec<PartitionId>) -> Self {
        Self {
            id: id.into(),
            addr,
            partitions,
        }
    }

    pub fn serves(&self, partition: PartitionId) -> bool {
        self.partitions.contains(&partition)
    }
}

/// A versioned snapshot of cluster membership: `node id -> node`.
///
/// Views are values. Changes produce a new view with a higher version; nothing
/// mutates a view that has already been published.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembershipView {
    pub version: u64,
    pub members: BTreeMap<NodeId, NodeInfo>,
}

impl MembershipView {
    pub fn new(version: u64, nodes: impl IntoIterator<Item = NodeInfo>) -> Self {
        Self {
            version,
            members: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<&NodeInfo> {
        self.members.get(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Next view with `node` added (or replaced).
    pub fn with_node(&self, node: NodeInfo) -> Self {
        let mut members = self.members.clone();
        members.insert(node.id.clone(), node);
        Self {
            version: self.version + 1,
            members,
        }
    }

    /// Next view with `id` removed.
    pub fn without_node(&self, id: &NodeId) -> Self {
        let mut members = self.members.clone();
        members.remove(id);
        Self {
            version: self.version + 1,
            members,
        }
    }
}
