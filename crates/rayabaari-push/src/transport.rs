use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("push relay answered {0}")]
    Status(u16),

    #[error("subscription store: {0}")]
    Store(String),
}

/// What the recipient's device shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub url: String,
}

impl PushPayload {
    pub fn new_message(author: &str) -> Self {
        Self {
            title: format!("Message from {}", author),
            body: "New secure message received".to_string(),
            url: "/".to_string(),
        }
    }
}

/// Delivers one notification to one subscription.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, subscription: &Value, payload: &PushPayload) -> Result<(), PushError>;
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    subscription: &'a Value,
    payload: &'a PushPayload,
}

/// Hands notifications to an HTTP push relay, which owns the web-push keys.
pub struct RelayTransport {
    client: reqwest::Client,
    url: String,
}

impl RelayTransport {
    pub fn new(url: impl Into<String>) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PushTransport for RelayTransport {
    async fn send(&self, subscription: &Value, payload: &PushPayload) -> Result<(), PushError> {
        let response = self
            .client
            .post(&self.url)
            .json(&RelayRequest {
                subscription,
                payload,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PushError::Status(status.as_u16()));
        }
        debug!("Push relay accepted notification ({})", status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_names_author_only() {
        let payload = PushPayload::new_message("asha");
        assert_eq!(payload.title, "Message from asha");
        assert_eq!(payload.body, "New secure message received");
        assert_eq!(payload.url, "/");
    }

    #[test]
    fn relay_request_shape() {
        let subscription = json!({"endpoint": "https://push.example/abc"});
        let payload = PushPayload::new_message("ravi");
        let body = serde_json::to_value(RelayRequest {
            subscription: &subscription,
            payload: &payload,
        })
        .unwrap();
        assert_eq!(body["subscription"]["endpoint"], "https://push.example/abc");
        assert_eq!(body["payload"]["title"], "Message from ravi");
    }
}
