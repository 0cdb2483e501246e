use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{DeliveryReport, PushError, PushGateway, PushPayload, TokenFailure, MAX_BATCH};

const EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

#[derive(Serialize)]
struct ExpoMessage {
    to: String,
    title: String,
    body: String,
    data: serde_json::Value,
    sound: &'static str,
    #[serde(rename = "channelId")]
    channel_id: &'static str,
    ttl: i32,
}

#[derive(Deserialize)]
struct ExpoResponse {
    data: Vec<ExpoTicket>,
}

#[derive(Deserialize)]
struct ExpoTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Batched Expo push delivery over the `exp.host` transport, with a
/// 500-token batch size, a carried data map, and per-batch-retry-once /
/// whole-batch-failure semantics (spec.md 4.4).
pub struct ExpoPushGateway {
    client: Client,
    access_token: Option<String>,
}

impl ExpoPushGateway {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            access_token: None,
        }
    }

    /// Expo's optional "enhanced security" access token, read from
    /// `PUSH_CREDENTIALS_PATH` at startup (spec.md 6: the on-disk format of
    /// push-gateway credentials is unspecified; we treat the file contents
    /// as an opaque bearer token when non-empty).
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    async fn send_batch_once(&self, messages: &[ExpoMessage]) -> Result<Vec<ExpoTicket>, String> {
        let mut request = self
            .client
            .post(EXPO_PUSH_URL)
            .header("Accept", "application/json")
            .header("Accept-Encoding", "gzip, deflate")
            .header("Content-Type", "application/json");
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request.json(messages).send().await.map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("expo API returned {status}: {body}"));
        }

        let parsed: ExpoResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(parsed.data)
    }

    /// Submit one batch, retrying the transport call exactly once on
    /// failure (spec.md 4.4) before counting it as a whole-batch failure.
    async fn send_batch(&self, messages: &[ExpoMessage]) -> Result<Vec<ExpoTicket>, String> {
        match self.send_batch_once(messages).await {
            Ok(tickets) => Ok(tickets),
            Err(first_reason) => {
                tracing::warn!(reason = %first_reason, "expo batch failed, retrying once");
                self.send_batch_once(messages).await.map_err(|_| first_reason)
            }
        }
    }
}

#[async_trait]
impl PushGateway for ExpoPushGateway {
    async fn push(
        &self,
        tokens: &[String],
        payload: &PushPayload,
        region: &str,
    ) -> Result<DeliveryReport, PushError> {
        if region.trim().is_empty() {
            return Err(PushError::InvalidArgument("region must not be empty".to_string()));
        }
        if tokens.is_empty() {
            tracing::debug!(region = %region, "push called with no tokens");
            return Ok(DeliveryReport::default());
        }

        let mut report = DeliveryReport::default();
        let mut batch_count = 0usize;
        let mut transport_failed_batches = 0usize;

        for chunk in tokens.chunks(MAX_BATCH) {
            batch_count += 1;
            let messages: Vec<ExpoMessage> = chunk
                .iter()
                .map(|token| ExpoMessage {
                    to: token.clone(),
                    title: payload.title.clone(),
                    body: payload.body.clone(),
                    data: payload.data.clone(),
                    sound: "default",
                    channel_id: "weather",
                    ttl: 3600,
                })
                .collect();

            match self.send_batch(&messages).await {
                Ok(tickets) => {
                    for (token, ticket) in chunk.iter().zip(tickets.into_iter()) {
                        if ticket.status == "ok" {
                            report.success_count += 1;
                        } else {
                            report.failure_count += 1;
                            report.failures.push(TokenFailure {
                                token: token.clone(),
                                reason: ticket.message.unwrap_or_else(|| "unknown error".to_string()),
                            });
                        }
                    }
                }
                Err(reason) => {
                    transport_failed_batches += 1;
                    report.failure_count += chunk.len();
                    for token in chunk {
                        report.failures.push(TokenFailure {
                            token: token.clone(),
                            reason: format!("batch transport error: {reason}"),
                        });
                    }
                }
            }
        }

        if transport_failed_batches == batch_count {
            tracing::error!(region = %region, "every push batch failed transport");
            return Err(PushError::AllFailed);
        }

        tracing::info!(
            region = %region,
            success = report.success_count,
            failure = report.failure_count,
            "push delivery complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_tokens_returns_empty_report_without_a_network_call() {
        let gateway = ExpoPushGateway::new(Client::new());
        let payload = PushPayload {
            title: "t".to_string(),
            body: "b".to_string(),
            data: serde_json::json!({}),
        };
        let report = gateway.push(&[], &payload, "Chicago").await.unwrap();
        assert_eq!(report.success_count, 0);
        assert_eq!(report.failure_count, 0);
    }

    #[tokio::test]
    async fn empty_region_is_invalid_argument() {
        let gateway = ExpoPushGateway::new(Client::new());
        let payload = PushPayload {
            title: "t".to_string(),
            body: "b".to_string(),
            data: serde_json::json!({}),
        };
        let result = gateway.push(&["tok".to_string()], &payload, "  ").await;
        assert!(matches!(result, Err(PushError::InvalidArgument(_))));
    }

    #[test]
    fn batch_sizes_match_spec_boundaries() {
        let sizes_of = |n: usize| -> Vec<usize> {
            let tokens = vec!["tok".to_string(); n];
            tokens.chunks(MAX_BATCH).map(|c| c.len()).collect()
        };
        assert_eq!(sizes_of(500), vec![500]);
        assert_eq!(sizes_of(501), vec![500, 1]);
        assert_eq!(sizes_of(1500), vec![500, 500, 500]);
    }
}
