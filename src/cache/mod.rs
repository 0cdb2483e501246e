pub mod key;
mod memory;
mod redis_backend;

pub use key::normalize_region;
pub use memory::InMemoryCache;
pub use redis_backend::RedisCache;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::weather::WeatherRecord;

/// Default time-to-live for a cached weather record (spec.md 4.2).
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Transient(String),
}

/// Region-keyed TTL cache of fetched weather records (spec.md 4.2).
///
/// Implementations MUST apply a set's fields and expiry atomically: no
/// entry may exist with no expiry, and a present `get` implies the entry
/// has not yet expired.
#[async_trait]
pub trait WeatherCache: Send + Sync {
    async fn get(&self, region: &str) -> Result<Option<WeatherRecord>, CacheError>;
    async fn set(&self, region: &str, record: WeatherRecord) -> Result<(), CacheError>;
    async fn delete(&self, region: &str) -> Result<(), CacheError>;
    async fn ttl(&self, region: &str) -> Result<Option<Duration>, CacheError>;
    async fn close(&self) -> Result<(), CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}
