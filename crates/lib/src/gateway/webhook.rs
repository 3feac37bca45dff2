//! Inbound webhook registry and the delivery handler that feeds the pending table.
//!
//! `POST /api/webhook/{id}` is dispatched to whatever handler registered `id`. Handler
//! panics are caught here and answered with 500 so a bad delivery cannot take the gateway down.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::StatusCode;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::protocol::{Ack, InboundDelivery};
use crate::correlator::PendingTable;

/// Status code plus JSON acknowledgement returned to the webhook caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReply {
    pub status: StatusCode,
    pub ack: Ack,
}

impl WebhookReply {
    pub fn ok() -> Self {
        Self {
            status: StatusCode::OK,
            ack: Ack::ok(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            ack: Ack::error(message),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            ack: Ack::error(message),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            ack: Ack::error(message),
        }
    }
}

/// Handles the raw body posted to one webhook id.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, webhook_id: &str, body: Bytes) -> WebhookReply;
}

/// Registry of webhook ids to handlers. Shared across the gateway.
pub struct WebhookRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn WebhookHandler>>>>,
}

impl Default for WebhookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `handler` for `webhook_id`, replacing any previous handler.
    pub async fn register(&self, webhook_id: String, handler: Arc<dyn WebhookHandler>) {
        let mut g = self.inner.write().await;
        if g.insert(webhook_id.clone(), handler).is_some() {
            log::warn!("webhook {} registered twice, previous handler replaced", webhook_id);
        }
    }

    pub async fn get(&self, webhook_id: &str) -> Option<Arc<dyn WebhookHandler>> {
        let g = self.inner.read().await;
        g.get(webhook_id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        let g = self.inner.read().await;
        let mut ids: Vec<String> = g.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Route a body to the handler for `webhook_id`. Unknown id => 404; handler panic => 500.
    pub async fn dispatch(&self, webhook_id: &str, body: Bytes) -> WebhookReply {
        let Some(handler) = self.get(webhook_id).await else {
            log::debug!("webhook {} not registered", webhook_id);
            return WebhookReply::not_found(format!("unknown webhook: {}", webhook_id));
        };
        match AssertUnwindSafe(handler.handle(webhook_id, body))
            .catch_unwind()
            .await
        {
            Ok(reply) => reply,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                log::error!("error handling webhook {}: {}", webhook_id, msg);
                WebhookReply::internal(msg)
            }
        }
    }
}

/// Receives `{ request_id, response }` from the automation engine and stores it in the pending table.
pub struct DeliveryHandler {
    pending: Arc<PendingTable>,
}

impl DeliveryHandler {
    pub fn new(pending: Arc<PendingTable>) -> Self {
        Self { pending }
    }
}

#[async_trait]
impl WebhookHandler for DeliveryHandler {
    async fn handle(&self, webhook_id: &str, body: Bytes) -> WebhookReply {
        let delivery: InboundDelivery = match serde_json::from_slice(&body) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("invalid webhook body on {}: {}", webhook_id, e);
                return WebhookReply::bad_request(format!("invalid JSON body: {}", e));
            }
        };
        let request_id = delivery.request_id.unwrap_or_default();
        let response = delivery.response.as_deref().unwrap_or("").trim().to_string();
        if request_id.is_empty() || response.is_empty() {
            log::warn!(
                "invalid webhook data: request_id={:?}, response={:?}",
                request_id,
                response
            );
            return WebhookReply::bad_request("Invalid data: request_id and response are required");
        }
        if let Err(e) = self.pending.deliver(&request_id, response.as_str()) {
            log::warn!("rejected delivery for {}: {}", request_id, e);
            return WebhookReply::bad_request(e.to_string());
        }
        log::info!("received webhook response for {}: {}", request_id, response);
        WebhookReply::ok()
    }
}
