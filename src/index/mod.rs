//! Partition Index Module
//!
//! The contract between the scatter-gather layer and a partition's index,
//! plus the in-memory engine the node binary serves from.
//!
//! ## Submodules
//! - **`engine`**: `IndexEngine` trait, `SnapshotLease` scoped acquisition, `IndexError`.
//! - **`memory`**: `MemoryIndex`, copy-on-write segmented partitions with lease counting.
//! - **`query`**: JSON selection payload understood by `MemoryIndex`.
//! - **`pruning`**: pluggable segment pruning and short-circuit ordering.
//! - **`handlers`**: bulk-load endpoint.

pub mod engine;
pub mod handlers;
pub mod memory;
pub mod pruning;
pub mod query;

#[cfg(test)]
mod tests;
