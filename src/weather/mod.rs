mod fetcher;

pub use fetcher::HttpWeatherFetcher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A single weather observation for a region. No identity of its own --
/// identified by the region key under which the cache stores it
/// (spec.md 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub precipitation_mm: f64,
    pub wind_speed_mps: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("region must not be empty")]
    InvalidArgument,

    #[error("fetch failed after retries: {0}")]
    FetchFailed(String),
}

/// On-demand retrieval of current weather for a region (spec.md 4.3).
#[async_trait]
pub trait WeatherFetcher: Send + Sync {
    async fn fetch(
        &self,
        region: &str,
        cancel: &CancellationToken,
    ) -> Result<WeatherRecord, FetchError>;
}
