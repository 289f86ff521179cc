use super::feed::MembershipFeed;
use super::types::{MembershipView, NodeId, NodeInfo};

use axum::{Extension, Json, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ENDPOINT_MEMBERSHIP: &str = "/membership";
pub const ENDPOINT_MEMBERSHIP_PUBLISH: &str = "/internal/membership";
pub const ENDPOINT_MEMBERSHIP_JOIN: &str = "/membership/join";
pub const ENDPOINT_MEMBERSHIP_LEAVE: &str = "/membership/leave";

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub node_id: NodeId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub accepted: bool,
    pub version: u64,
}

pub async fn handle_get_membership(
    Extension(feed): Extension<Arc<MembershipFeed>>,
) -> Json<MembershipView> {
    Json(feed.current().as_ref().clone())
}

pub async fn handle_publish_membership(
    Extension(feed): Extension<Arc<MembershipFeed>>,
    Json(view): Json<MembershipView>,
) -> (StatusCode, Json<PublishResponse>) {
    let accepted = feed.publish(view);
    let version = feed.current().version;
    let status = if accepted {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(PublishResponse { accepted, version }))
}

pub async fn handle_join(
    Extension(feed): Extension<Arc<MembershipFeed>>,
    Json(node): Json<NodeInfo>,
) -> Json<MembershipView> {
    Json(feed.join(node).as_ref().clone())
}

pub async fn handle_leave(
    Extension(feed): Extension<Arc<MembershipFeed>>,
    Json(req): Json<LeaveRequest>,
) -> Json<MembershipView> {
    Json(feed.leave(&req.node_id).as_ref().clone())
}
