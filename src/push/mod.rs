mod expo_gateway;
pub mod template;

pub use expo_gateway::ExpoPushGateway;
pub use template::{build_payload, PushPayload};

use async_trait::async_trait;
use thiserror::Error;

/// Sequential batches of at most this many tokens per transport call
/// (spec.md 4.4).
pub const MAX_BATCH: usize = 500;

#[derive(Error, Debug)]
pub enum PushError {
    #[error("push argument invalid: {0}")]
    InvalidArgument(String),

    #[error("all batches failed, nothing was delivered")]
    AllFailed,
}

/// Per-token failure, recorded in a `DeliveryReport`.
#[derive(Debug, Clone)]
pub struct TokenFailure {
    pub token: String,
    pub reason: String,
}

/// Aggregated delivery outcome across all batches (spec.md 4.4).
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub success_count: usize,
    pub failure_count: usize,
    pub failures: Vec<TokenFailure>,
}

/// Batched delivery of one payload to many device tokens, reporting
/// per-token success/failure (spec.md 4.4).
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn push(
        &self,
        tokens: &[String],
        payload: &PushPayload,
        region: &str,
    ) -> Result<DeliveryReport, PushError>;
}
