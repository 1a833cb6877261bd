//! Node endpoints

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use tracing::debug;

use crate::api::{error::ApiResult, state::ApiState};
use crate::protocol::SetParentRequest;
use crate::topology::{NewNode, Node, NodeUpdate};

/// POST /api/properties/:id/nodes
pub async fn add_node(
    State(state): State<ApiState>,
    Path(property_id): Path<String>,
    body: Result<Json<NewNode>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    let Json(new) = body?;
    let node = state.store.add_node(&property_id, new).await?;

    debug!("added {} node {} to {property_id}", node.node_type, node.id);
    Ok((StatusCode::CREATED, Json(node)))
}

/// DELETE /api/properties/:id/nodes
pub async fn clear_nodes(
    State(state): State<ApiState>,
    Path(property_id): Path<String>,
) -> ApiResult<StatusCode> {
    let removed = state.store.clear_nodes(&property_id).await?;

    debug!("cleared {removed} nodes from {property_id}");
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/properties/:id/nodes/:node
pub async fn update_node(
    State(state): State<ApiState>,
    Path((property_id, node_id)): Path<(String, String)>,
    body: Result<Json<NodeUpdate>, JsonRejection>,
) -> ApiResult<Json<Node>> {
    let Json(update) = body?;
    let node = state.store.update_node(&property_id, &node_id, update).await?;
    Ok(Json(node))
}

/// DELETE /api/properties/:id/nodes/:node
///
/// Children of the removed node become roots
pub async fn delete_node(
    State(state): State<ApiState>,
    Path((property_id, node_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.store.delete_node(&property_id, &node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/properties/:id/nodes/:node/parent
pub async fn set_parent(
    State(state): State<ApiState>,
    Path((property_id, node_id)): Path<(String, String)>,
    body: Result<Json<SetParentRequest>, JsonRejection>,
) -> ApiResult<Json<Node>> {
    let Json(request) = body?;
    let node = state
        .store
        .set_parent(&property_id, &node_id, request.parent.as_deref())
        .await?;
    Ok(Json(node))
}
