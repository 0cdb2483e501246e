use std::sync::Arc;
use thiserror::Error;

use crate::db::{AlarmRepository, DbError};

use super::models::{Alarm, AlarmRegistrationRequest};

#[derive(Error, Debug)]
pub enum AlarmsError {
    #[error("alarm not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

/// Thin CRUD over `AlarmRepository` (spec.md 1: persisted-alarm CRUD
/// semantics beyond the fields the scheduler reads/writes are out of
/// scope).
pub struct AlarmsService {
    repo: Arc<dyn AlarmRepository>,
}

impl AlarmsService {
    pub fn new(repo: Arc<dyn AlarmRepository>) -> Self {
        Self { repo }
    }

    pub async fn register(&self, request: AlarmRegistrationRequest) -> Result<i64, AlarmsError> {
        let id = self
            .repo
            .create(
                request.user_id,
                request.alarm_minute,
                &request.region,
                request.enabled,
            )
            .await?;

        tracing::info!(alarm_id = id, user_id = request.user_id, "alarm registered");
        Ok(id)
    }

    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<Alarm>, AlarmsError> {
        Ok(self.repo.list_by_user(user_id).await?)
    }

    pub async fn get(&self, alarm_id: i64) -> Result<Alarm, AlarmsError> {
        self.repo
            .get_by_id(alarm_id)
            .await?
            .ok_or(AlarmsError::NotFound)
    }

    pub async fn delete(&self, alarm_id: i64) -> Result<(), AlarmsError> {
        match self.repo.soft_delete(alarm_id).await {
            Ok(()) => {
                tracing::info!(alarm_id, "alarm deleted");
                Ok(())
            }
            Err(DbError::NotFound(_)) => Err(AlarmsError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
