// Snapshot schedule endpoints

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::common::{api_error, bad_request, ApiResponse, ApiResult};
use crate::clock::parse_utc;
use crate::errors::ErrorKind;
use crate::services::{CreateScheduleRequest, RestorationInfo, ScheduleInfo, SnapshotInfo};
use crate::web::AppState;

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    /// RFC 3339, or `YYYY-MM-DD HH:MM:SS.ffffff` in UTC
    pub restoration_time: String,
}

/// Create a schedule and start its timer
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(request): Json<CreateScheduleRequest>,
) -> ApiResult<ScheduleInfo> {
    match state.admin_service.create_schedule(request).await {
        Ok(schedule) => Ok(Json(ApiResponse::success(schedule))),
        Err(e) => {
            warn!("Failed to create schedule: {}", e);
            Err(api_error(e))
        }
    }
}

/// List every schedule
pub async fn list_schedules(State(state): State<AppState>) -> ApiResult<Vec<ScheduleInfo>> {
    state
        .admin_service
        .list_schedules(None)
        .await
        .map(|schedules| Json(ApiResponse::success(schedules)))
        .map_err(|e| {
            error!("Failed to list schedules: {}", e);
            api_error(e)
        })
}

/// Exactly one schedule, or 404
pub async fn get_schedule(
    Path(schedule_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Vec<ScheduleInfo>> {
    state
        .admin_service
        .list_schedules(Some(&schedule_id))
        .await
        .map(|schedules| Json(ApiResponse::success(schedules)))
        .map_err(api_error)
}

pub async fn delete_schedule(
    Path(schedule_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Value> {
    info!("Schedule deletion requested for: {}", schedule_id);

    match state.admin_service.delete_schedule(&schedule_id).await {
        Ok(()) => Ok(Json(ApiResponse::success(json!({
            "message": format!("Schedule {} deleted", schedule_id),
            "schedule_id": schedule_id,
        })))),
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to delete schedule {}: {}", schedule_id, e);
            }
            Err(api_error(e))
        }
    }
}

/// Snapshot history, oldest first
pub async fn list_schedule_snapshots(
    Path(schedule_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Vec<SnapshotInfo>> {
    state
        .admin_service
        .schedule_snapshots(&schedule_id)
        .await
        .map(|snapshots| Json(ApiResponse::success(snapshots)))
        .map_err(api_error)
}

/// Start a point-in-time restoration; poll `/api/restorations/{id}` for the outcome
pub async fn restore_schedule(
    Path(schedule_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<RestoreRequest>,
) -> ApiResult<RestorationInfo> {
    let Some(target) = parse_utc(&request.restoration_time) else {
        return Err(bad_request(format!(
            "Invalid restoration_time '{}'",
            request.restoration_time
        )));
    };

    info!(
        "Restoration of schedule {} to {} requested",
        schedule_id, request.restoration_time
    );
    match state.admin_service.restore(&schedule_id, target).await {
        Ok(job) => Ok(Json(ApiResponse::success(job))),
        Err(e) => {
            warn!("Restoration of schedule {} rejected: {}", schedule_id, e);
            Err(api_error(e))
        }
    }
}
