//! Outbound webhook client: `POST {base_url}/webhook/{target}` with a JSON body.

use async_trait::async_trait;
use std::time::Duration;

use super::request::ConversationRequest;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook transport error: {0}")]
    Other(String),
}

/// Sends the outbound payload. Any HTTP status counts as sent; only transport faults are errors.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Returns the HTTP status code of the response.
    async fn send(&self, target: &str, payload: &ConversationRequest) -> Result<u16, TransportError>;
}

/// reqwest-backed sender.
#[derive(Clone)]
pub struct HttpWebhookSender {
    base_url: String,
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn webhook_url(&self, target: &str) -> String {
        format!("{}/webhook/{}", self.base_url, target)
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, target: &str, payload: &ConversationRequest) -> Result<u16, TransportError> {
        let url = self.webhook_url(target);
        let res = self.client.post(&url).json(payload).send().await?;
        let status = res.status();
        if status.is_success() {
            log::info!("webhook {} answered {}", target, status);
        } else {
            let body = res.text().await.unwrap_or_default();
            log::warn!("webhook {} answered {} {}", target, status, body);
        }
        Ok(status.as_u16())
    }
}
