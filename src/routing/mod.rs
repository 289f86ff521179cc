//! Partition Routing Module
//!
//! Maps partitions to the nodes serving them and picks one replica per
//! `(partition, routing key)` pair with consistent hashing.
//!
//! ## Core Concepts
//! - **Ring**: SipHash tokens with virtual nodes, one ring per partition.
//! - **Table**: `RoutingTable` is an immutable snapshot built deterministically from a view.
//! - **Router**: `PartitionRouter` swaps whole tables on membership changes.

pub mod ring;
pub mod router;
pub mod table;
