//! Membership event feed.
//!
//! Publishes versioned [`MembershipView`]s over a `tokio::sync::watch`
//! channel. Subscribers always observe the latest complete view; intermediate
//! views may be skipped when several changes land between two reads, which is
//! fine because every view is a full snapshot.

use super::types::{MembershipView, NodeId, NodeInfo};
use crate::routing::router::PartitionRouter;

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct MembershipFeed {
    tx: watch::Sender<Arc<MembershipView>>,
}

impl MembershipFeed {
    pub fn new(initial: MembershipView) -> Arc<Self> {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Arc::new(Self { tx })
    }

    pub fn current(&self) -> Arc<MembershipView> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MembershipView>> {
        self.tx.subscribe()
    }

    /// Replaces the whole view. Views older than the current one are ignored
    /// so that a delayed publisher cannot roll the cluster back.
    pub fn publish(&self, view: MembershipView) -> bool {
        let accepted = self.tx.send_if_modified(|current| {
            if view.version <= current.version {
                return false;
            }
            *current = Arc::new(view);
            true
        });
        if !accepted {
            tracing::debug!("Ignoring stale membership view");
        }
        accepted
    }

    pub fn join(&self, node: NodeInfo) -> Arc<MembershipView> {
        tracing::info!(
            "Node {} joining at {} with {} partitions",
            node.id,
            node.addr,
            node.partitions.len()
        );
        self.tx.send_modify(|current| {
            *current = Arc::new(current.with_node(node));
        });
        self.current()
    }

    pub fn leave(&self, id: &NodeId) -> Arc<MembershipView> {
        tracing::info!("Node {} leaving cluster", id);
        self.tx.send_if_modified(|current| {
            if current.get(id).is_none() {
                return false;
            }
            *current = Arc::new(current.without_node(id));
            true
        });
        self.current()
    }
}

/// Applies every view published on `feed` to `router`.
///
/// The router is brought up to date with the feed's current view before the
/// task starts listening, so no change can be missed between construction and
/// subscription.
pub fn spawn_router_updater(
    feed: Arc<MembershipFeed>,
    router: Arc<PartitionRouter>,
) -> JoinHandle<()> {
    let mut rx = feed.subscribe();
    let initial = rx.borrow_and_update().clone();
    router.on_membership_changed(&initial);

    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let view = rx.borrow_and_update().clone();
            tracing::info!(
                "Membership changed: version {} with {} nodes",
                view.version,
                view.len()
            );
            router.on_membership_changed(&view);
        }
        tracing::debug!("Membership feed closed, router updater exiting");
    })
}
