use super::memory::{Document, MemoryIndex};
use crate::search::types::PartitionId;

use axum::{Extension, Json, extract::Path, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ENDPOINT_INDEX_PARTITION: &str = "/internal/index/:partition";

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexDocumentsRequest {
    pub documents: Vec<Document>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexDocumentsResponse {
    pub partition: PartitionId,
    pub generation: u64,
    pub doc_count: usize,
}

/// Bulk-loads documents into a partition served by this node.
pub async fn handle_index_documents(
    Extension(index): Extension<Arc<MemoryIndex>>,
    Path(partition): Path<PartitionId>,
    Json(req): Json<IndexDocumentsRequest>,
) -> (StatusCode, Json<IndexDocumentsResponse>) {
    let added = req.documents.len();
    let generation = index.add_documents(partition, req.documents);
    let doc_count = index.doc_count(partition);

    tracing::info!(
        "Indexed {} documents into partition {} (generation {})",
        added,
        partition,
        generation
    );

    (
        StatusCode::OK,
        Json(IndexDocumentsResponse {
            partition,
            generation,
            doc_count,
        }),
    )
}
