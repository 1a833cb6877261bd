//! Health check endpoint

use axum::{Json, extract::State};

use crate::api::{error::ApiResult, state::ApiState};
use crate::protocol::HealthResponse;

/// GET /api/health
///
/// Liveness plus the number of open sync sessions and cached probe addresses
pub async fn health_check(State(state): State<ApiState>) -> ApiResult<Json<HealthResponse>> {
    let sessions = state.broadcaster.session_count().await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now(),
        sessions,
        cached_addresses: state.status.len(),
    }))
}
