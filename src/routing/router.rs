use super::table::RoutingTable;
use crate::membership::types::{MembershipView, NodeInfo};
use crate::search::types::PartitionId;

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Virtual nodes per physical node on each partition ring.
pub const DEFAULT_VIRTUAL_NODES: u32 = 64;

/// Shared partition router.
///
/// The current [`RoutingTable`] lives behind an `Arc` that is swapped whole on
/// membership changes. The lock is held only to clone or replace the pointer,
/// never while routing, so a reader sees either the old or the new table in
/// full.
pub struct PartitionRouter {
    table: RwLock<Arc<RoutingTable>>,
    virtual_nodes: u32,
}

impl PartitionRouter {
    pub fn new(virtual_nodes: u32) -> Arc<Self> {
        Arc::new(Self {
            table: RwLock::new(Arc::new(RoutingTable::default())),
            virtual_nodes,
        })
    }

    pub fn from_view(view: &MembershipView, virtual_nodes: u32) -> Arc<Self> {
        Arc::new(Self {
            table: RwLock::new(Arc::new(RoutingTable::build(view, virtual_nodes))),
            virtual_nodes,
        })
    }

    /// Current table. Callers planning a multi-partition request should take
    /// one snapshot and route every partition against it.
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.table.read().clone()
    }

    pub fn route(&self, partition: PartitionId, routing_key: &[u8]) -> Option<NodeInfo> {
        self.snapshot().route(partition, routing_key).cloned()
    }

    pub fn partitions(&self) -> BTreeSet<PartitionId> {
        self.snapshot().partitions()
    }

    /// Rebuilds the table from `view` and swaps it in.
    ///
    /// The rebuild happens outside the lock. Views older than the installed
    /// table are ignored.
    pub fn on_membership_changed(&self, view: &MembershipView) {
        let current_version = self.table.read().version();
        if view.version < current_version {
            tracing::debug!(
                "Skipping membership view {} (table at {})",
                view.version,
                current_version
            );
            return;
        }

        let rebuilt = Arc::new(RoutingTable::build(view, self.virtual_nodes));
        let partitions = rebuilt.partitions().len();

        let mut table = self.table.write();
        if view.version < table.version() {
            return;
        }
        *table = rebuilt;
        drop(table);

        tracing::info!(
            "Routing table rebuilt: version {}, {} nodes, {} partitions",
            view.version,
            view.len(),
            partitions
        );
    }
}
