//! Partitioned Search Cluster Library
//!
//! Scatter-gather query execution over partitions spread across a cluster.
//! This library defines the subsystems the `search-node` binary wires together.
//!
//! ## Architecture Modules
//! - **`search`**: request, hit and result types plus the error kinds reported in results.
//! - **`routing`**: per-partition consistent-hash rings; picks one replica per request.
//! - **`membership`**: versioned cluster views and the feed that pushes them to the router.
//! - **`index`**: the index engine contract, scoped snapshot leases and an in-memory engine.
//! - **`executor`**: node side; runs a request on local partitions under a deadline.
//! - **`broker`**: client side; plans, dispatches, gathers and merges node results.
//! - **`merge`**: pure merging of partial results (hits, facets, groups, totals).
//! - **`metrics`**: stage timings and failure counters.
//! - **`config`**: CLI flags over a TOML file.

pub mod broker;
pub mod config;
pub mod executor;
pub mod index;
pub mod membership;
pub mod merge;
pub mod metrics;
pub mod routing;
pub mod search;
