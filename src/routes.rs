use axum::{
    middleware,
    routing::{delete, get},
    Extension, Router,
};

use crate::alarms::handlers as alarms_handlers;
use crate::devices::handlers as devices_handlers;
use crate::health::health_handler;
use crate::middleware::{require_api_key, DeviceApiKey};
use crate::AppState;

/// Alarm CRUD, gated the same way as device-token registration (spec.md 1).
fn alarms_routes() -> Router<AppState> {
    Router::new()
        .route("/alarms", get(alarms_handlers::list_alarms).post(alarms_handlers::register_alarm))
        .route("/alarms/{alarm_id}", get(alarms_handlers::get_alarm).delete(alarms_handlers::delete_alarm))
}

/// Device-token CRUD (protected by API key auth).
fn devices_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/devices",
            get(devices_handlers::list_device_tokens).post(devices_handlers::register_device_token),
        )
        .route(
            "/devices/{token_id}",
            delete(devices_handlers::unregister_device_token),
        )
}

/// All API v1 routes, gated by the device API key.
pub fn api_v1_routes(device_api_key: Option<String>) -> Router<AppState> {
    Router::new()
        .merge(alarms_routes())
        .merge(devices_routes())
        .layer(Extension(DeviceApiKey(device_api_key)))
        .layer(middleware::from_fn(require_api_key))
}

/// Build the complete application router.
pub fn build_router(state: AppState) -> Router<AppState> {
    let device_api_key = state.config.device_api_key.clone();
    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1", api_v1_routes(device_api_key))
}
