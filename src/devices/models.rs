use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A push-capable device belonging to a user (spec.md 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceToken {
    pub token_id: i64,
    pub user_id: i64,
    pub push_token: String,
    pub device_id: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a device token.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTokenRegistrationRequest {
    pub user_id: i64,
    pub push_token: String,
    pub device_id: String,
}

/// Response envelope for device-token CRUD operations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTokenResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DeviceTokenResponse {
    pub fn success(token_id: Option<i64>) -> Self {
        Self {
            success: true,
            token_id,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            token_id: None,
            message: Some(message.into()),
        }
    }
}
