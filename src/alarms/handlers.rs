use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::AppState;

use super::models::{AlarmRegistrationRequest, AlarmResponse};
use super::service::AlarmsError;

#[derive(Debug, Deserialize)]
pub struct ListAlarmsQuery {
    pub user_id: i64,
}

/// POST /alarms - Register a new alarm
pub async fn register_alarm(
    State(state): State<AppState>,
    Json(request): Json<AlarmRegistrationRequest>,
) -> impl IntoResponse {
    match state.alarms_service.register(request).await {
        Ok(alarm_id) => (StatusCode::OK, Json(AlarmResponse::success(Some(alarm_id)))),
        Err(e) => {
            tracing::error!(error = %e, "failed to register alarm");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AlarmResponse::error(e.to_string())),
            )
        }
    }
}

/// GET /alarms?user_id=... - List a user's alarms
pub async fn list_alarms(
    State(state): State<AppState>,
    Query(query): Query<ListAlarmsQuery>,
) -> impl IntoResponse {
    match state.alarms_service.list_by_user(query.user_id).await {
        Ok(alarms) => (StatusCode::OK, Json(alarms)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to list alarms");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AlarmResponse::error(e.to_string())),
            )
                .into_response()
        }
    }
}

/// GET /alarms/:alarm_id - Fetch a single alarm
pub async fn get_alarm(State(state): State<AppState>, Path(alarm_id): Path<i64>) -> impl IntoResponse {
    match state.alarms_service.get(alarm_id).await {
        Ok(alarm) => (StatusCode::OK, Json(alarm)).into_response(),
        Err(AlarmsError::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(AlarmResponse::error("alarm not found")),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch alarm");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AlarmResponse::error(e.to_string())),
            )
                .into_response()
        }
    }
}

/// DELETE /alarms/:alarm_id - Soft-delete an alarm
pub async fn delete_alarm(
    State(state): State<AppState>,
    Path(alarm_id): Path<i64>,
) -> impl IntoResponse {
    match state.alarms_service.delete(alarm_id).await {
        Ok(()) => (StatusCode::OK, Json(AlarmResponse::success(None))),
        Err(AlarmsError::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(AlarmResponse::error("alarm not found")),
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to delete alarm");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AlarmResponse::error(e.to_string())),
            )
        }
    }
}
