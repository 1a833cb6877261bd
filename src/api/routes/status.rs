//! Probe status endpoint

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::state::ApiState;
use crate::probe::HealthRecord;

/// GET /api/node-status/:address
///
/// Served from the cache while fresh; otherwise waits for a (shared) probe
pub async fn node_status(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Json<HealthRecord> {
    Json(state.status.get(&address).await)
}
