//! Partition Executor Module
//!
//! The node side of scatter-gather: executes a request on the local
//! partitions under a deadline and returns one node-level partial result.
//!
//! ## Execution Model
//! 1. **Fan-out**: one task per partition, bounded by a semaphore; the query
//!    runs on a blocking thread.
//! 2. **Lease**: each task holds its partition snapshot through a
//!    `SnapshotLease`, released on every exit path.
//! 3. **Collect**: tasks are awaited with the remaining budget; late ones are
//!    recorded as `ExecutionTimeout` and left to finish in the background.
//! 4. **Merge**: results are merged without applying the client window.
//!
//! ## Submodules
//! - **`executor`**: `PartitionExecutor`, the worker pool and deadline logic.
//! - **`protocol`**: HTTP DTOs for the execute and stats RPCs.
//! - **`handlers`**: axum handlers for those RPCs.

pub mod executor;
pub mod handlers;
pub mod protocol;
