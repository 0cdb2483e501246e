use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-configured wake-to-weather notification (spec.md 3).
///
/// Mutated by the HTTP CRUD layer in every field except `last_sent_at`,
/// which only the scheduler advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub alarm_id: i64,
    pub user_id: i64,
    pub alarm_minute: NaiveTime,
    pub region: String,
    pub enabled: bool,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a new alarm.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmRegistrationRequest {
    pub user_id: i64,
    pub alarm_minute: NaiveTime,
    pub region: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Response envelope for alarm CRUD operations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AlarmResponse {
    pub fn success(alarm_id: Option<i64>) -> Self {
        Self {
            success: true,
            alarm_id,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            alarm_id: None,
            message: Some(message.into()),
        }
    }
}
