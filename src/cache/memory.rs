use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::key::normalize_region;
use super::{CacheError, WeatherCache};
use crate::weather::WeatherRecord;

struct Entry {
    record: WeatherRecord,
    expires_at: Instant,
}

/// Single-instance, in-process TTL cache (DashMap + `Instant`-based
/// expiry), holding region -> `WeatherRecord` entries (spec.md 4.2).
pub struct InMemoryCache {
    data: DashMap<String, Entry>,
    ttl: Duration,
}

impl InMemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            data: DashMap::new(),
            ttl,
        }
    }

    /// Drop expired entries. Not required for correctness (`get` already
    /// treats an expired entry as a miss) but keeps memory bounded.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.data.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl WeatherCache for InMemoryCache {
    async fn get(&self, region: &str) -> Result<Option<WeatherRecord>, CacheError> {
        let key = normalize_region(region);
        let Some(entry) = self.data.get(&key) else {
            return Ok(None);
        };
        if entry.expires_at > Instant::now() {
            Ok(Some(entry.record.clone()))
        } else {
            drop(entry);
            self.data.remove(&key);
            Ok(None)
        }
    }

    async fn set(&self, region: &str, mut record: WeatherRecord) -> Result<(), CacheError> {
        if record.observed_at.timestamp() == 0 {
            record.observed_at = Utc::now();
        }
        let key = normalize_region(region);
        self.data.insert(
            key,
            Entry {
                record,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, region: &str) -> Result<(), CacheError> {
        self.data.remove(&normalize_region(region));
        Ok(())
    }

    async fn ttl(&self, region: &str) -> Result<Option<Duration>, CacheError> {
        let key = normalize_region(region);
        Ok(self.data.get(&key).and_then(|entry| {
            let now = Instant::now();
            (entry.expires_at > now).then(|| entry.expires_at - now)
        }))
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
