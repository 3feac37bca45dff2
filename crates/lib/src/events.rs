//! Host event bus: observational events fired by the relay agent.
//!
//! Frames have the same shape the gateway streams over `/ws`:
//! `{ "type": "event", "event": <name>, "payload": {..}, "timeFired": <rfc3339> }`.

use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;

/// Fired once per conversation turn, whatever the outcome.
pub const EVENT_CONVERSATION_FINISHED: &str = "conversation.finished";

/// Fired when the gateway begins shutting down.
pub const EVENT_SHUTDOWN: &str = "shutdown";

/// Payload of [`EVENT_CONVERSATION_FINISHED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationFinished {
    pub response: String,
    pub user_input: String,
}

/// Fire-and-forget event sink. Implementations must not block or fail the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: serde_json::Value);
}

/// Build a wire frame for an event.
pub fn event_frame(event: &str, payload: serde_json::Value) -> String {
    json!({
        "type": "event",
        "event": event,
        "payload": payload,
        "timeFired": chrono::Utc::now().to_rfc3339(),
    })
    .to_string()
}

/// Sink that publishes JSON frames on a broadcast channel (subscribers: `/ws` clients).
#[derive(Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<String>,
}

impl BroadcastEventSink {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: &str, payload: serde_json::Value) {
        // No subscribers is fine; the event is purely observational.
        if self.tx.send(event_frame(event, payload)).is_err() {
            log::trace!("event {} dropped: no subscribers", event);
        }
    }
}
