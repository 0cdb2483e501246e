mod alarms;
mod cache;
mod clock;
mod config;
mod db;
mod devices;
mod error;
mod health;
mod metrics_sink;
mod middleware;
mod notifications;
mod push;
mod routes;
mod scheduler;
mod weather;

use std::{fs, sync::Arc, time::Duration};

use axum::{error_handling::HandleErrorLayer, http::StatusCode, BoxError};
use reqwest::Client;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::alarms::AlarmsService;
use crate::cache::{InMemoryCache, RedisCache, WeatherCache, DEFAULT_TTL};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::db::{create_pool, run_migrations, DbConfig, SqliteAlarmRepository, SqliteAlarmStore, SqliteDeviceTokenRepository};
use crate::devices::DeviceTokensService;
use crate::health::HealthProbe;
use crate::push::{ExpoPushGateway, PushGateway};
use crate::scheduler::SchedulerCore;
use crate::weather::{HttpWeatherFetcher, WeatherFetcher};

/// Shared HTTP client configuration.
const HTTP_TIMEOUT_SECS: u64 = 30;
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 5;
const HTTP_POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// The scheduler operates in this fixed zone (spec.md 9, Clock): local-day
/// boundaries for duplicate suppression and the alarm minute grid are both
/// evaluated against it.
const SERVICE_TIMEZONE: chrono_tz::Tz = chrono_tz::Asia::Seoul;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub alarms_service: Arc<AlarmsService>,
    pub device_tokens_service: Arc<DeviceTokensService>,
    pub health_probe: Arc<HealthProbe>,
}

fn create_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECS))
        .pool_max_idle_per_host(10)
        .build()
}

async fn handle_timeout_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "Request timed out".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {err}"))
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, starting graceful shutdown");
}

/// Builds the weather cache backend the config selects: Redis when
/// `REDIS_HOST` is set (multi-instance deployments), otherwise the
/// in-process cache (spec.md 2, single-instance default).
async fn build_cache(config: &AppConfig) -> anyhow::Result<Arc<dyn WeatherCache>> {
    match config.redis_url() {
        Some(url) => {
            let cache = RedisCache::connect(&url, DEFAULT_TTL).await?;
            tracing::info!("redis weather cache connected");
            Ok(Arc::new(cache))
        }
        None => {
            tracing::info!("using in-process weather cache");
            Ok(Arc::new(InMemoryCache::new(DEFAULT_TTL)))
        }
    }
}

fn build_push_gateway(client: Client, config: &AppConfig) -> Arc<dyn PushGateway> {
    let mut gateway = ExpoPushGateway::new(client);
    match fs::read_to_string(&config.push_credentials_path) {
        Ok(contents) => {
            let token = contents.trim();
            if !token.is_empty() {
                gateway = gateway.with_access_token(token.to_string());
                tracing::info!("expo access token loaded from PUSH_CREDENTIALS_PATH");
            }
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config.push_credentials_path,
                "no push credentials file found, continuing without an access token"
            );
        }
    }
    Arc::new(gateway)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_alarm_scheduler=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;
    tracing::info!("configuration loaded successfully");

    metrics_sink::install_recorder(config.metrics_port)?;

    let db_config = DbConfig {
        url: config.sqlite_url(),
        max_connections: 5,
    };
    let pool = create_pool(&db_config).await?;
    run_migrations(&pool).await?;
    tracing::info!("database ready");

    let alarm_repo = Arc::new(SqliteAlarmRepository::new(pool.clone()));
    let device_token_repo = Arc::new(SqliteDeviceTokenRepository::new(pool.clone()));
    let alarms_service = Arc::new(AlarmsService::new(alarm_repo.clone()));
    let device_tokens_service = Arc::new(DeviceTokensService::new(device_token_repo.clone()));

    let store = Arc::new(SqliteAlarmStore::new(pool));
    let cache = build_cache(&config).await?;

    let http_client = create_http_client()?;
    let fetcher: Arc<dyn WeatherFetcher> = Arc::new(HttpWeatherFetcher::new(
        http_client.clone(),
        config.openweathermap_api_key.clone(),
    ));
    let push = build_push_gateway(http_client, &config);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(SERVICE_TIMEZONE));

    let scheduler = SchedulerCore::new(clock, store.clone(), cache.clone(), fetcher, push, config.scheduler_interval());
    scheduler.start().await?;
    tracing::info!("scheduler started");

    let health_probe = Arc::new(HealthProbe::new(scheduler.clone(), store, cache));

    let state = AppState {
        config: Arc::new(config.clone()),
        alarms_service,
        device_tokens_service,
        health_probe,
    };

    let app = routes::build_router(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .timeout(Duration::from_secs(60)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    tracing::info!("server shutdown complete");

    Ok(())
}
