use super::broker::Broker;
use super::info::{ClusterInfoBroker, ClusterStats};
use crate::search::error::SearchError;
use crate::search::types::{SearchRequest, SearchResult};

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

pub const ENDPOINT_SEARCH: &str = "/search";
pub const ENDPOINT_CLUSTER_INFO: &str = "/cluster/info";

/// Malformed requests come back as 400 with the reason in `errors`; every
/// other outcome, degraded or not, is a 200.
pub async fn handle_search(
    Extension(broker): Extension<Arc<Broker>>,
    Json(request): Json<SearchRequest>,
) -> (StatusCode, Json<SearchResult>) {
    let request_id = request.request_id.clone();
    match broker.try_browse(request).await {
        Ok(result) => (StatusCode::OK, Json(result)),
        Err(e) => {
            tracing::warn!("Bad search request: {}", e);
            let mut result = SearchResult::empty(request_id);
            result.errors.push(SearchError::Gather {
                message: format!("invalid request: {}", e),
            });
            (StatusCode::BAD_REQUEST, Json(result))
        }
    }
}

pub async fn handle_cluster_info(
    Extension(info): Extension<Arc<ClusterInfoBroker>>,
) -> (StatusCode, Json<ClusterStats>) {
    (StatusCode::OK, Json(info.cluster_info().await))
}
