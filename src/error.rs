use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Standard error response format for all API errors
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    pub fn with_code(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
        }
    }
}

/// Trait for errors that can be converted to HTTP responses
pub trait HttpError: std::error::Error {
    /// HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Optional error code for programmatic handling (e.g., "CITY_NOT_FOUND")
    fn error_code(&self) -> Option<&'static str> {
        None
    }
}

/// Convert any HttpError into an Axum response
pub fn into_response<E: HttpError>(err: E) -> Response {
    let status = err.status_code();
    let code = err.error_code();
    let message = err.to_string();

    tracing::error!(
        error = %message,
        status = %status,
        code = ?code,
        "API error"
    );

    let body = if let Some(code) = code {
        ErrorResponse::with_code(message, code)
    } else {
        ErrorResponse::new(message)
    };

    (status, Json(body)).into_response()
}

/// Macro to implement IntoResponse for HttpError types
#[macro_export]
macro_rules! impl_into_response {
    ($error_type:ty) => {
        impl axum::response::IntoResponse for $error_type {
            fn into_response(self) -> axum::response::Response {
                $crate::error::into_response(self)
            }
        }
    };
}

/// Behavioral error categories shared across the core components
/// (store, cache, fetcher, push). Each component defines its own
/// `thiserror` enum, but every variant maps to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input from the caller; nothing was attempted.
    InvalidArgument,
    /// Backend unreachable or timed out; safe to treat as absent/skip.
    Transient,
    /// The targeted row no longer exists.
    NotFound,
    /// Retry budget exhausted.
    FetchFailed,
    /// Every batch's transport call failed and nothing was delivered.
    AllFailed,
    /// Schema/driver/misconfiguration; operator intervention needed.
    Fatal,
}

/// Sliding window of operational-error timestamps backing the health
/// probe's "errors in the last 5 minutes" field (spec.md 4.6). The alert
/// threshold (10/min) is informational -- surfaced in the health JSON, not
/// enforced here.
pub struct ErrorWindow {
    events: std::sync::Mutex<std::collections::VecDeque<std::time::Instant>>,
    window: std::time::Duration,
}

pub const DEFAULT_ERROR_WINDOW: std::time::Duration = std::time::Duration::from_secs(5 * 60);
pub const ERROR_ALERT_PER_MINUTE: u64 = 10;

impl ErrorWindow {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            events: std::sync::Mutex::new(std::collections::VecDeque::new()),
            window,
        }
    }

    pub fn record(&self) {
        let now = std::time::Instant::now();
        let mut events = self.events.lock().unwrap();
        events.push_back(now);
        Self::prune(&mut events, now, self.window);
    }

    pub fn count(&self) -> usize {
        let now = std::time::Instant::now();
        let mut events = self.events.lock().unwrap();
        Self::prune(&mut events, now, self.window);
        events.len()
    }

    fn prune(
        events: &mut std::collections::VecDeque<std::time::Instant>,
        now: std::time::Instant,
        window: std::time::Duration,
    ) {
        while events.front().is_some_and(|t| now.duration_since(*t) > window) {
            events.pop_front();
        }
    }
}

impl Default for ErrorWindow {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_WINDOW)
    }
}
