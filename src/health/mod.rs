use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::cache::WeatherCache;
use crate::db::AlarmStore;
use crate::error::ERROR_ALERT_PER_MINUTE;
use crate::scheduler::SchedulerCore;
use crate::AppState;

/// Bound on how long a component ping may take before it counts as
/// degraded (spec.md 4.6).
const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComponentState {
    Ok,
    Degraded,
}

impl ComponentState {
    fn as_str(self) -> &'static str {
        match self {
            ComponentState::Ok => "ok",
            ComponentState::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthComponents {
    pub scheduler: String,
    pub store: String,
    pub cache: String,
}

/// The `GET /health` response shape (spec.md 6).
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: HealthComponents,
    pub error_count: usize,
    pub error_alert_threshold_per_minute: u64,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Aggregates scheduler state plus a bounded ping of the store and cache
/// into the health JSON spec.md 4.6 describes (ok iff scheduler is
/// Running and both pings succeed within 5s).
pub struct HealthProbe {
    scheduler: Arc<SchedulerCore>,
    store: Arc<dyn AlarmStore>,
    cache: Arc<dyn WeatherCache>,
    started_at: Instant,
}

impl HealthProbe {
    pub fn new(scheduler: Arc<SchedulerCore>, store: Arc<dyn AlarmStore>, cache: Arc<dyn WeatherCache>) -> Self {
        Self {
            scheduler,
            store,
            cache,
            started_at: Instant::now(),
        }
    }

    pub async fn check(&self) -> HealthReport {
        let scheduler_running = self.scheduler.state_is_running().await;
        let scheduler_state = if scheduler_running {
            ComponentState::Ok
        } else {
            ComponentState::Degraded
        };

        let store_state = match tokio::time::timeout(PING_TIMEOUT, self.store.ping()).await {
            Ok(Ok(())) => ComponentState::Ok,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "store ping failed");
                ComponentState::Degraded
            }
            Err(_) => {
                tracing::warn!("store ping exceeded {:?}", PING_TIMEOUT);
                ComponentState::Degraded
            }
        };

        let cache_state = match tokio::time::timeout(PING_TIMEOUT, self.cache.ping()).await {
            Ok(Ok(())) => ComponentState::Ok,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "cache ping failed");
                ComponentState::Degraded
            }
            Err(_) => {
                tracing::warn!("cache ping exceeded {:?}", PING_TIMEOUT);
                ComponentState::Degraded
            }
        };

        let overall = if scheduler_state == ComponentState::Ok
            && store_state == ComponentState::Ok
            && cache_state == ComponentState::Ok
        {
            ComponentState::Ok
        } else {
            ComponentState::Degraded
        };

        HealthReport {
            status: overall.as_str().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            components: HealthComponents {
                scheduler: scheduler_state.as_str().to_string(),
                store: store_state.as_str().to_string(),
                cache: cache_state.as_str().to_string(),
            },
            error_count: self.scheduler.recent_error_count(),
            error_alert_threshold_per_minute: ERROR_ALERT_PER_MINUTE,
        }
    }
}

/// `GET /health` (spec.md 6): 200 when `status == "ok"`, 503 otherwise.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health_probe.check().await;
    let status = if report.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
