//! Membership Module
//!
//! Holds the cluster view consumed by routing: which nodes exist, where they
//! listen, and which partitions each one serves.
//!
//! ## Core Mechanisms
//! - **Views**: `MembershipView` is an immutable, versioned `node id -> node` snapshot.
//! - **Feed**: `MembershipFeed` publishes views as events; stale versions are rejected.
//! - **Router updates**: `spawn_router_updater` rebuilds the routing table on every change.

pub mod feed;
pub mod handlers;
pub mod types;
