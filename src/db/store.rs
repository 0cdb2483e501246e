use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::alarms::Alarm;
use crate::devices::DeviceToken;

use super::{
    AlarmRepository, DbError, DeviceTokenRepository, SqliteAlarmRepository,
    SqliteDeviceTokenRepository,
};

/// The three operations `SchedulerCore` depends on (spec.md 4.1), behind a
/// single facade so the scheduler takes `Arc<dyn AlarmStore>` rather than
/// two separate repositories (spec.md 9, "polymorphism over capabilities").
#[async_trait]
pub trait AlarmStore: Send + Sync {
    async fn due_alarms(
        &self,
        target_minute: NaiveTime,
        start_of_today_local: DateTime<Utc>,
    ) -> Result<Vec<Alarm>, DbError>;

    async fn active_tokens(&self, user_id: i64) -> Result<Vec<DeviceToken>, DbError>;

    async fn mark_sent(&self, alarm_id: i64, ts: DateTime<Utc>) -> Result<(), DbError>;

    async fn ping(&self) -> Result<(), DbError>;
}

/// Production `AlarmStore`, wrapping the two SQLite repositories.
pub struct SqliteAlarmStore {
    alarms: SqliteAlarmRepository,
    tokens: SqliteDeviceTokenRepository,
}

impl SqliteAlarmStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            alarms: SqliteAlarmRepository::new(pool.clone()),
            tokens: SqliteDeviceTokenRepository::new(pool),
        }
    }
}

#[async_trait]
impl AlarmStore for SqliteAlarmStore {
    async fn due_alarms(
        &self,
        target_minute: NaiveTime,
        start_of_today_local: DateTime<Utc>,
    ) -> Result<Vec<Alarm>, DbError> {
        self.alarms.due_alarms(target_minute, start_of_today_local).await
    }

    async fn active_tokens(&self, user_id: i64) -> Result<Vec<DeviceToken>, DbError> {
        self.tokens.active_tokens(user_id).await
    }

    async fn mark_sent(&self, alarm_id: i64, ts: DateTime<Utc>) -> Result<(), DbError> {
        self.alarms.mark_sent(alarm_id, ts).await
    }

    async fn ping(&self) -> Result<(), DbError> {
        self.alarms.ping().await
    }
}

/// In-memory `AlarmStore` test double (spec.md 8 seed scenarios), guarded by
/// a single mutex over both collections -- simplicity over throughput, since
/// it only ever serves tests.
pub struct InMemoryAlarmStore {
    inner: Mutex<InMemoryState>,
}

struct InMemoryState {
    alarms: Vec<Alarm>,
    tokens: Vec<DeviceToken>,
}

impl InMemoryAlarmStore {
    pub fn new(alarms: Vec<Alarm>, tokens: Vec<DeviceToken>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(InMemoryState { alarms, tokens }),
        })
    }

    pub async fn snapshot_alarms(&self) -> Vec<Alarm> {
        self.inner.lock().await.alarms.clone()
    }
}

#[async_trait]
impl AlarmStore for InMemoryAlarmStore {
    async fn due_alarms(
        &self,
        target_minute: NaiveTime,
        start_of_today_local: DateTime<Utc>,
    ) -> Result<Vec<Alarm>, DbError> {
        let state = self.inner.lock().await;
        Ok(state
            .alarms
            .iter()
            .filter(|a| {
                a.alarm_minute == target_minute
                    && a.enabled
                    && a.deleted_at.is_none()
                    && a.last_sent_at.map(|ts| ts < start_of_today_local).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn active_tokens(&self, user_id: i64) -> Result<Vec<DeviceToken>, DbError> {
        let state = self.inner.lock().await;
        Ok(state
            .tokens
            .iter()
            .filter(|t| t.user_id == user_id && t.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, alarm_id: i64, ts: DateTime<Utc>) -> Result<(), DbError> {
        let mut state = self.inner.lock().await;
        let alarm = state
            .alarms
            .iter_mut()
            .find(|a| a.alarm_id == alarm_id)
            .ok_or_else(|| DbError::NotFound(alarm_id.to_string()))?;
        alarm.last_sent_at = Some(ts);
        Ok(())
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }
}
