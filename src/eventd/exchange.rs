//! Message exchange publisher.
//!
//! Events go out through the broker's HTTP API, one publish per event,
//! marked persistent so they survive a broker restart. Connection-level
//! failures are the daemon's retry case; anything else is fatal to it.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::models::JobEvent;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("exchange unreachable: {0}")]
    Connection(String),

    #[error("exchange rejected publish with status {status}")]
    Rejected { status: u16 },

    #[error("failed to encode event: {0}")]
    Encode(String),
}

impl PublishError {
    /// Transient broker outage, safe to retry with the same event.
    pub fn is_connection(&self) -> bool {
        matches!(self, PublishError::Connection(_))
    }
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait EventExchange: Send + Sync {
    async fn publish(&self, routing_key: &str, event: &JobEvent) -> Result<(), PublishError>;
}

/// RabbitMQ exchange client over the management HTTP API.
pub struct RabbitExchangeClient {
    client: reqwest::Client,
    publish_url: String,
    username: String,
    password: String,
}

impl RabbitExchangeClient {
    pub fn new(
        base_url: &str,
        vhost: &str,
        exchange: &str,
        username: &str,
        password: &str,
        timeout_secs: u64,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            publish_url: format!(
                "{}/api/exchanges/{}/{}/publish",
                base_url.trim_end_matches('/'),
                encode_vhost(vhost),
                exchange,
            ),
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// The default vhost "/" must travel percent-encoded in the path.
fn encode_vhost(vhost: &str) -> String {
    vhost.replace('/', "%2F")
}

#[derive(Debug, serde::Deserialize)]
struct PublishResponse {
    routed: bool,
}

#[async_trait]
impl EventExchange for RabbitExchangeClient {
    async fn publish(&self, routing_key: &str, event: &JobEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| PublishError::Encode(e.to_string()))?;

        let body = json!({
            "properties": {"delivery_mode": 2},
            "routing_key": routing_key,
            "payload": payload,
            "payload_encoding": "string",
        });

        let response = self
            .client
            .post(&self.publish_url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected {
                status: status.as_u16(),
            });
        }

        let result: PublishResponse = response
            .json()
            .await
            .map_err(|e| PublishError::Connection(e.to_string()))?;
        if !result.routed {
            // No queue bound yet. The broker accepted the message, so the
            // publish itself succeeded.
            warn!("Event for {} was not routed to any queue", routing_key);
        }
        Ok(())
    }
}
