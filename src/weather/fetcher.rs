use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{FetchError, WeatherFetcher, WeatherRecord};

const OPENWEATHERMAP_API_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Upstream current-weather fetcher, built around an OpenWeatherMap
/// client producing a region-agnostic `WeatherRecord`, wrapped in the
/// retry+backoff policy spec.md 4.3 requires.
pub struct HttpWeatherFetcher {
    client: Client,
    api_key: String,
    per_attempt_timeout: Duration,
    max_attempts: u32,
}

#[derive(Debug, Deserialize)]
struct OpenWeatherMapResponse {
    main: MainInfo,
    #[serde(default)]
    wind: Option<WindInfo>,
    #[serde(default)]
    rain: Option<PrecipInfo>,
    #[serde(default)]
    snow: Option<PrecipInfo>,
}

#[derive(Debug, Deserialize)]
struct MainInfo {
    temp: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WindInfo {
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PrecipInfo {
    #[serde(rename = "1h", default)]
    one_hour: Option<f64>,
}

impl HttpWeatherFetcher {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            per_attempt_timeout: Duration::from_secs(10),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    async fn attempt(&self, region: &str) -> Result<WeatherRecord, String> {
        let response = self
            .client
            .get(OPENWEATHERMAP_API_URL)
            .query(&[
                ("q", region),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("upstream returned {status}"));
        }

        let body: OpenWeatherMapResponse = response.json().await.map_err(|e| e.to_string())?;

        let temperature_c = body
            .main
            .temp
            .ok_or_else(|| "missing required field: temperature".to_string())?;

        Ok(WeatherRecord {
            temperature_c,
            humidity_pct: body.main.humidity.unwrap_or(0.0),
            precipitation_mm: body
                .rain
                .and_then(|p| p.one_hour)
                .or_else(|| body.snow.and_then(|p| p.one_hour))
                .unwrap_or(0.0),
            wind_speed_mps: body.wind.and_then(|w| w.speed).unwrap_or(0.0),
            observed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl WeatherFetcher for HttpWeatherFetcher {
    async fn fetch(
        &self,
        region: &str,
        cancel: &CancellationToken,
    ) -> Result<WeatherRecord, FetchError> {
        if region.trim().is_empty() {
            return Err(FetchError::InvalidArgument);
        }

        let mut backoff = INITIAL_BACKOFF;
        let mut last_reason = String::new();

        for attempt in 1..=self.max_attempts {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(FetchError::FetchFailed("cancelled".to_string()));
                }
                result = tokio::time::timeout(self.per_attempt_timeout, self.attempt(region)) => result,
            };

            match outcome {
                Ok(Ok(record)) => {
                    tracing::debug!(region = %region, attempt, "fetch succeeded");
                    return Ok(record);
                }
                Ok(Err(reason)) => last_reason = reason,
                Err(_elapsed) => last_reason = "timed out".to_string(),
            }

            tracing::warn!(region = %region, attempt, reason = %last_reason, "fetch attempt failed");

            if attempt < self.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(FetchError::FetchFailed("cancelled".to_string()));
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff *= 2;
            }
        }

        Err(FetchError::FetchFailed(last_reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_region_is_invalid_argument_without_a_network_call() {
        let fetcher = HttpWeatherFetcher::new(Client::new(), "test-key");
        let cancel = CancellationToken::new();
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fetcher.fetch("   ", &cancel));
        assert!(matches!(result, Err(FetchError::InvalidArgument)));
    }
}
