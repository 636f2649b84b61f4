// Restoration tracking endpoints

use axum::{
    extract::{Path, State},
    response::Json,
};
use tracing::error;

use super::common::{api_error, ApiResponse, ApiResult};
use crate::restoration_tracker::RestorationActivity;
use crate::services::RestorationInfo;
use crate::web::AppState;

pub async fn list_restorations(State(state): State<AppState>) -> ApiResult<Vec<RestorationInfo>> {
    state
        .admin_service
        .list_restorations(None)
        .await
        .map(|jobs| Json(ApiResponse::success(jobs)))
        .map_err(|e| {
            error!("Failed to list restorations: {}", e);
            api_error(e)
        })
}

/// Exactly one restoration, or 404
pub async fn get_restoration(
    Path(restoration_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Vec<RestorationInfo>> {
    state
        .admin_service
        .list_restorations(Some(&restoration_id))
        .await
        .map(|jobs| Json(ApiResponse::success(jobs)))
        .map_err(api_error)
}

/// Schedules currently held by a running restoration
pub async fn get_active_restorations(State(state): State<AppState>) -> ApiResult<RestorationActivity> {
    let activity = state.restoration_tracker.get_activity().await;
    Ok(Json(ApiResponse::success(activity)))
}
