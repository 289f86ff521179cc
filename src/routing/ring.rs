//! Consistent-hash ring.
//!
//! Every node contributes `virtual_nodes` tokens. A lookup returns the owner
//! of the first token `>=` the key's token, wrapping around to the smallest
//! token. Tokens come from SipHash-2-4 with fixed keys so every process builds
//! the same ring for the same members.

use crate::membership::types::NodeId;
use crate::search::types::PartitionId;

use siphasher::sip::SipHasher24;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Token of one virtual node of `node`.
pub fn node_token(node: &NodeId, replica: u32) -> u64 {
    let mut hasher = SipHasher24::new();
    node.0.hash(&mut hasher);
    replica.hash(&mut hasher);
    hasher.finish()
}

/// Token for a `(routing key, partition)` pair.
///
/// Mixing in the partition keeps one key from landing on the same ring
/// position for every partition, which spreads a single request's load across
/// replicas.
pub fn route_token(routing_key: &[u8], partition: PartitionId) -> u64 {
    let mut hasher = SipHasher24::new();
    routing_key.hash(&mut hasher);
    partition.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashRing {
    tokens: BTreeMap<u64, NodeId>,
}

impl HashRing {
    /// Builds a ring from `nodes`.
    ///
    /// Nodes are inserted in sorted order so that the (astronomically rare)
    /// token collision resolves the same way on every build.
    pub fn build<'a, I>(nodes: I, virtual_nodes: u32) -> Self
    where
        I: IntoIterator<Item = &'a NodeId>,
    {
        let mut sorted: Vec<&NodeId> = nodes.into_iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut tokens = BTreeMap::new();
        for node in sorted {
            for replica in 0..virtual_nodes.max(1) {
                tokens
                    .entry(node_token(node, replica))
                    .or_insert_with(|| node.clone());
            }
        }
        Self { tokens }
    }

    pub fn lookup(&self, token: u64) -> Option<&NodeId> {
        self.tokens
            .range(token..)
            .next()
            .or_else(|| self.tokens.iter().next())
            .map(|(_, node)| node)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}
