use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::AppState;

use super::models::{DeviceTokenRegistrationRequest, DeviceTokenResponse};
use super::service::DeviceTokensError;

#[derive(Debug, Deserialize)]
pub struct ListDeviceTokensQuery {
    pub user_id: i64,
}

/// POST /devices - Register a device token
pub async fn register_device_token(
    State(state): State<AppState>,
    Json(request): Json<DeviceTokenRegistrationRequest>,
) -> impl IntoResponse {
    match state.device_tokens_service.register(request).await {
        Ok(token_id) => (
            StatusCode::OK,
            Json(DeviceTokenResponse::success(Some(token_id))),
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to register device token");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DeviceTokenResponse::error(e.to_string())),
            )
        }
    }
}

/// GET /devices?user_id=... - List a user's active device tokens
pub async fn list_device_tokens(
    State(state): State<AppState>,
    Query(query): Query<ListDeviceTokensQuery>,
) -> impl IntoResponse {
    match state.device_tokens_service.list_by_user(query.user_id).await {
        Ok(tokens) => (StatusCode::OK, Json(tokens)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to list device tokens");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DeviceTokenResponse::error(e.to_string())),
            )
                .into_response()
        }
    }
}

/// DELETE /devices/:token_id - Unregister a device token
pub async fn unregister_device_token(
    State(state): State<AppState>,
    Path(token_id): Path<i64>,
) -> impl IntoResponse {
    match state.device_tokens_service.unregister(token_id).await {
        Ok(()) => (StatusCode::OK, Json(DeviceTokenResponse::success(None))),
        Err(DeviceTokensError::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(DeviceTokenResponse::error("device token not found")),
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to unregister device token");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DeviceTokenResponse::error(e.to_string())),
            )
        }
    }
}
