use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::key::normalize_region;
use super::{CacheError, WeatherCache};
use crate::weather::WeatherRecord;

/// Wire encoding for a cached record: numeric fields as decimal strings
/// with 2 digits after the point, `observed_at` as Unix seconds (spec.md 6).
#[derive(Serialize, Deserialize)]
struct EncodedRecord {
    temperature: String,
    humidity: String,
    precipitation: String,
    wind_speed: String,
    observed_at: String,
}

impl From<&WeatherRecord> for EncodedRecord {
    fn from(r: &WeatherRecord) -> Self {
        Self {
            temperature: format!("{:.2}", r.temperature_c),
            humidity: format!("{:.2}", r.humidity_pct),
            precipitation: format!("{:.2}", r.precipitation_mm),
            wind_speed: format!("{:.2}", r.wind_speed_mps),
            observed_at: r.observed_at.timestamp().to_string(),
        }
    }
}

impl TryFrom<EncodedRecord> for WeatherRecord {
    type Error = CacheError;

    fn try_from(e: EncodedRecord) -> Result<Self, CacheError> {
        let parse = |s: &str| -> Result<f64, CacheError> {
            s.parse()
                .map_err(|_| CacheError::Transient(format!("malformed numeric field: {s}")))
        };
        let observed_secs: i64 = e
            .observed_at
            .parse()
            .map_err(|_| CacheError::Transient("malformed observed_at".to_string()))?;
        Ok(WeatherRecord {
            temperature_c: parse(&e.temperature)?,
            humidity_pct: parse(&e.humidity)?,
            precipitation_mm: parse(&e.precipitation)?,
            wind_speed_mps: parse(&e.wind_speed)?,
            observed_at: DateTime::<Utc>::from_timestamp(observed_secs, 0)
                .ok_or_else(|| CacheError::Transient("malformed observed_at".to_string()))?,
        })
    }
}

/// Distributed TTL cache backed by Redis, for deployments sharing one
/// weather cache across multiple scheduler instances: an auto-reconnecting
/// async connection manager wrapping a single `SET key value EX ttl` per
/// write so the value and its expiry land as one atomic command.
pub struct RedisCache {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisCache {
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Transient(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Transient(e.to_string()))?;
        Ok(Self { conn, ttl })
    }
}

#[async_trait]
impl WeatherCache for RedisCache {
    async fn get(&self, region: &str) -> Result<Option<WeatherRecord>, CacheError> {
        let key = normalize_region(region);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| CacheError::Transient(e.to_string()))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let encoded: EncodedRecord = serde_json::from_str(&raw)
            .map_err(|e| CacheError::Transient(e.to_string()))?;
        Ok(Some(encoded.try_into()?))
    }

    async fn set(&self, region: &str, mut record: WeatherRecord) -> Result<(), CacheError> {
        if record.observed_at.timestamp() == 0 {
            record.observed_at = Utc::now();
        }
        let key = normalize_region(region);
        let encoded = EncodedRecord::from(&record);
        let raw = serde_json::to_string(&encoded).map_err(|e| CacheError::Transient(e.to_string()))?;
        let mut conn = self.conn.clone();
        let ttl_ms: u64 = self.ttl.as_millis().try_into().unwrap_or(u64::MAX);
        conn.set_ex::<_, _, ()>(&key, raw, ttl_ms.max(1) / 1000 + 1)
            .await
            .map_err(|e| CacheError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, region: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&normalize_region(region))
            .await
            .map_err(|e| CacheError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn ttl(&self, region: &str) -> Result<Option<Duration>, CacheError> {
        let mut conn = self.conn.clone();
        let secs: i64 = conn
            .ttl(&normalize_region(region))
            .await
            .map_err(|e| CacheError::Transient(e.to_string()))?;
        Ok((secs > 0).then(|| Duration::from_secs(secs as u64)))
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::Transient(e.to_string()))
    }
}
