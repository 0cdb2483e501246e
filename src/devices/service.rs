use std::sync::Arc;
use thiserror::Error;

use crate::db::{DbError, DeviceTokenRepository};

use super::models::{DeviceToken, DeviceTokenRegistrationRequest};

#[derive(Error, Debug)]
pub enum DeviceTokensError {
    #[error("device token not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

/// Thin CRUD over `DeviceTokenRepository` (spec.md 1: the HTTP layer merely
/// writes rows the scheduler reads; no business rules beyond the data
/// model).
pub struct DeviceTokensService {
    repo: Arc<dyn DeviceTokenRepository>,
}

impl DeviceTokensService {
    pub fn new(repo: Arc<dyn DeviceTokenRepository>) -> Self {
        Self { repo }
    }

    pub async fn register(
        &self,
        request: DeviceTokenRegistrationRequest,
    ) -> Result<i64, DeviceTokensError> {
        let id = self
            .repo
            .create(request.user_id, &request.push_token, &request.device_id)
            .await?;

        tracing::info!(token_id = id, user_id = request.user_id, "device token registered");
        Ok(id)
    }

    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<DeviceToken>, DeviceTokensError> {
        Ok(self.repo.list_by_user(user_id).await?)
    }

    pub async fn unregister(&self, token_id: i64) -> Result<(), DeviceTokensError> {
        match self.repo.soft_delete(token_id).await {
            Ok(()) => {
                tracing::info!(token_id, "device token unregistered");
                Ok(())
            }
            Err(DbError::NotFound(_)) => Err(DeviceTokensError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
