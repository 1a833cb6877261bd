//! Property endpoints

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use tracing::info;

use crate::api::{error::ApiResult, state::ApiState};
use crate::protocol::{CreatePropertyRequest, PersistRequest, PersistResponse};
use crate::topology::Property;

/// GET /api/properties
///
/// Full state of every property; sessions bootstrap from this before listening
/// for changes
pub async fn list_properties(State(state): State<ApiState>) -> Json<Vec<Property>> {
    Json(state.store.list().await)
}

/// POST /api/properties
pub async fn create_property(
    State(state): State<ApiState>,
    body: Result<Json<CreatePropertyRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Property>)> {
    let Json(request) = body?;
    let property = state.store.create(&request.name, &request.image_ref).await?;

    info!("created property {} ({})", property.name, property.id);
    Ok((StatusCode::CREATED, Json(property)))
}

/// GET /api/properties/:id
pub async fn get_property(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Property>> {
    Ok(Json(state.store.get(&id).await?))
}

/// DELETE /api/properties/:id
pub async fn delete_property(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.delete_property(&id).await?;

    info!("deleted property {id}");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/properties/save
///
/// Write a whole document under the given filename
pub async fn save_property(
    State(state): State<ApiState>,
    body: Result<Json<PersistRequest>, JsonRejection>,
) -> ApiResult<Json<PersistResponse>> {
    let Json(request) = body?;
    let property = state
        .store
        .persist(&request.filename, &request.content_text())
        .await?;

    info!("saved property {} as {}", property.id, request.filename);
    Ok(Json(PersistResponse { success: true }))
}
