use super::executor::PartitionExecutor;
use super::protocol::*;
use crate::index::memory::MemoryIndex;
use crate::search::error::SearchError;
use crate::search::types::PartialResult;

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;
use std::time::Duration;

/// Budget used when a caller does not send one.
#[derive(Debug, Clone, Copy)]
pub struct DefaultBudget(pub Duration);

pub async fn handle_execute(
    Extension(executor): Extension<Arc<PartitionExecutor<MemoryIndex>>>,
    Extension(DefaultBudget(default_budget)): Extension<DefaultBudget>,
    Json(req): Json<NodeSearchRequest>,
) -> (StatusCode, Json<PartialResult>) {
    if let Err(e) = req.request.validate() {
        tracing::warn!("Rejecting execute request: {}", e);
        return (
            StatusCode::BAD_REQUEST,
            Json(PartialResult::from_error(SearchError::Gather {
                message: e.to_string(),
            })),
        );
    }

    let budget = req
        .budget_ms
        .map(Duration::from_millis)
        .map_or(default_budget, |b| b.min(default_budget));

    tracing::debug!(
        "Executing request {:?} on partitions {:?} with {:?} budget",
        req.request.request_id,
        req.partitions,
        budget
    );

    let partial = executor.execute(&req.request, &req.partitions, budget).await;
    (StatusCode::OK, Json(partial))
}

pub async fn handle_node_stats(
    Extension(executor): Extension<Arc<PartitionExecutor<MemoryIndex>>>,
) -> (StatusCode, Json<NodeStats>) {
    (StatusCode::OK, Json(executor.stats()))
}
