//! One relay turn: send the text out, wait for the correlated reply, fire the finished event.
//!
//! States per turn: Idle -> Sending -> Waiting -> Resolved. Every fault on the send/wait
//! path ends in Resolved with the instance's fallback text; `process` never fails.

use std::sync::Arc;
use std::time::Duration;

use super::request::{ConversationInput, ConversationRequest, ConversationResult, Outcome};
use super::sender::{TransportError, WebhookSender};
use crate::correlator::{PendingTable, WaitError};
use crate::events::{ConversationFinished, EventSink, EVENT_CONVERSATION_FINISHED};
use crate::settings::{RelaySettings, SettingsStore};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no send target configured")]
    ConfigurationMissing,
    #[error("no receive target configured, not waiting for a reply")]
    ReceiveTargetMissing,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Timeout(#[from] WaitError),
}

impl RelayError {
    fn outcome(&self) -> Outcome {
        match self {
            RelayError::Timeout(_) => Outcome::Timeout,
            _ => Outcome::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayState {
    Sending,
    Waiting,
    Resolved(Outcome),
}

impl RelayState {
    fn label(self) -> &'static str {
        match self {
            RelayState::Sending => "sending",
            RelayState::Waiting => "waiting",
            RelayState::Resolved(Outcome::Success) => "resolved (success)",
            RelayState::Resolved(Outcome::Timeout) => "resolved (timeout)",
            RelayState::Resolved(Outcome::Error) => "resolved (error)",
        }
    }
}

fn transition(conversation_id: &str, request_id: Option<&str>, state: RelayState) {
    log::debug!(
        "relay conversation={} request={}: {}",
        conversation_id,
        request_id.unwrap_or("-"),
        state.label()
    );
}

/// 128-bit random id in simple (hex) form.
fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Relay agent for one settings instance. Cheap to share behind `Arc`; turns run concurrently.
pub struct RelayAgent {
    instance_id: String,
    settings: Arc<dyn SettingsStore>,
    pending: Arc<PendingTable>,
    sender: Arc<dyn WebhookSender>,
    events: Arc<dyn EventSink>,
}

impl RelayAgent {
    pub fn new(
        instance_id: impl Into<String>,
        settings: Arc<dyn SettingsStore>,
        pending: Arc<PendingTable>,
        sender: Arc<dyn WebhookSender>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            settings,
            pending,
            sender,
            events,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn current_settings(&self) -> RelaySettings {
        self.settings.get(&self.instance_id).unwrap_or_else(|| {
            log::warn!(
                "relay: no settings for instance {}, using defaults",
                self.instance_id
            );
            RelaySettings::default()
        })
    }

    /// Run one turn. Always returns a result; on any failure the response is the fallback text.
    pub async fn process(&self, input: ConversationInput) -> ConversationResult {
        let conversation_id = input
            .conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_id);
        let settings = self.current_settings();

        let (response_text, outcome) = match self.relay(&settings, &input, &conversation_id).await {
            Ok(text) => (text, Outcome::Success),
            Err(e) => {
                match &e {
                    RelayError::ConfigurationMissing => log::debug!("relay: {}", e),
                    RelayError::ReceiveTargetMissing => log::info!("relay: {}", e),
                    RelayError::Transport(_) => log::error!("relay: {}", e),
                    RelayError::Timeout(_) => log::warn!("relay: {}", e),
                }
                (settings.fallback_error_text.clone(), e.outcome())
            }
        };
        transition(&conversation_id, None, RelayState::Resolved(outcome));

        let finished = ConversationFinished {
            response: response_text.clone(),
            user_input: input.text.clone(),
        };
        self.events.emit(
            EVENT_CONVERSATION_FINISHED,
            serde_json::to_value(&finished).unwrap_or(serde_json::Value::Null),
        );

        ConversationResult {
            response_text,
            conversation_id,
            outcome,
        }
    }

    async fn relay(
        &self,
        settings: &RelaySettings,
        input: &ConversationInput,
        conversation_id: &str,
    ) -> Result<String, RelayError> {
        if settings.send_target.is_empty() {
            return Err(RelayError::ConfigurationMissing);
        }

        let request_id = new_id();
        transition(conversation_id, Some(&request_id), RelayState::Sending);
        let payload = ConversationRequest {
            request_id: request_id.clone(),
            message: input.text.clone(),
            conversation_id: conversation_id.to_string(),
            satellite_id: input.satellite_id.clone(),
        };
        log::info!(
            "sending webhook request {} to {}",
            request_id,
            settings.send_target
        );
        self.sender.send(&settings.send_target, &payload).await?;

        if settings.receive_target.is_empty() {
            return Err(RelayError::ReceiveTargetMissing);
        }

        transition(conversation_id, Some(&request_id), RelayState::Waiting);
        let text = self
            .pending
            .await_and_consume(&request_id, Duration::from_secs(settings.timeout_seconds))
            .await?;
        log::info!("received response for {}", request_id);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::InstanceSettings;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Instant;

    #[test]
    fn resolved_state_label_names_outcome() {
        assert_eq!(RelayState::Sending.label(), "sending");
        assert_eq!(
            RelayState::Resolved(Outcome::Timeout).label(),
            "resolved (timeout)"
        );
        assert_eq!(
            RelayState::Resolved(Outcome::Error).label(),
            "resolved (error)"
        );
    }

    /// Records outbound payloads; optionally has the "automation engine" reply after a delay.
    struct FakeEngine {
        pending: Arc<PendingTable>,
        sent: Mutex<Vec<(String, ConversationRequest)>>,
        reply: Option<(Duration, fn(&ConversationRequest) -> String)>,
        fail: bool,
    }

    impl FakeEngine {
        fn new(pending: Arc<PendingTable>) -> Self {
            Self {
                pending,
                sent: Mutex::new(Vec::new()),
                reply: None,
                fail: false,
            }
        }

        fn sent(&self) -> Vec<(String, ConversationRequest)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WebhookSender for FakeEngine {
        async fn send(
            &self,
            target: &str,
            payload: &ConversationRequest,
        ) -> Result<u16, TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push((target.to_string(), payload.clone()));
            if self.fail {
                return Err(TransportError::Other("connection refused".to_string()));
            }
            if let Some((delay, make_reply)) = self.reply {
                let pending = self.pending.clone();
                let request_id = payload.request_id.clone();
                let text = make_reply(payload);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    pending.deliver(&request_id, text).unwrap();
                });
            }
            Ok(200)
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl EventSink for CollectingSink {
        fn emit(&self, event: &str, payload: serde_json::Value) {
            self.events
                .lock()
                .unwrap()
                .push((event.to_string(), payload));
        }
    }

    fn settings(send: &str, receive: &str, timeout_seconds: u64) -> Arc<InstanceSettings> {
        let store = InstanceSettings::new();
        store
            .set(
                "default".to_string(),
                RelaySettings {
                    send_target: send.to_string(),
                    receive_target: receive.to_string(),
                    timeout_seconds,
                    fallback_error_text: "Sorry, no answer".to_string(),
                },
            )
            .unwrap();
        Arc::new(store)
    }

    fn agent(
        settings: Arc<InstanceSettings>,
        pending: Arc<PendingTable>,
        engine: Arc<FakeEngine>,
        sink: Arc<CollectingSink>,
    ) -> RelayAgent {
        RelayAgent::new("default", settings, pending, engine, sink)
    }

    fn input(text: &str) -> ConversationInput {
        ConversationInput {
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn no_reply_times_out_with_fallback() {
        let pending = Arc::new(PendingTable::new());
        let engine = Arc::new(FakeEngine::new(pending.clone()));
        let sink = Arc::new(CollectingSink::default());
        let agent = agent(settings("x", "y", 1), pending.clone(), engine.clone(), sink.clone());

        let started = Instant::now();
        let result = agent.process(input("hello?")).await;
        let elapsed = started.elapsed();

        assert_eq!(result.response_text, "Sorry, no answer");
        assert_eq!(result.outcome, Outcome::Timeout);
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1300));
        assert_eq!(engine.sent().len(), 1);
        assert_eq!(pending.waiting(), 0);
    }

    #[tokio::test]
    async fn reply_after_send_is_returned() {
        let pending = Arc::new(PendingTable::new());
        let mut engine = FakeEngine::new(pending.clone());
        engine.reply = Some((Duration::from_millis(200), |_| "Hello".to_string()));
        let engine = Arc::new(engine);
        let sink = Arc::new(CollectingSink::default());
        let agent = agent(settings("x", "y", 1), pending.clone(), engine.clone(), sink.clone());

        let started = Instant::now();
        let result = agent.process(input("hi")).await;

        assert_eq!(result.response_text, "Hello");
        assert_eq!(result.outcome, Outcome::Success);
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(pending.is_empty());

        let events = sink.events.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, EVENT_CONVERSATION_FINISHED);
        assert_eq!(
            events[0].1,
            serde_json::json!({ "response": "Hello", "user_input": "hi" })
        );
    }

    #[tokio::test]
    async fn empty_send_target_skips_send_and_wait() {
        let pending = Arc::new(PendingTable::new());
        let engine = Arc::new(FakeEngine::new(pending.clone()));
        let sink = Arc::new(CollectingSink::default());
        let agent = agent(settings("", "y", 30), pending, engine.clone(), sink.clone());

        let started = Instant::now();
        let result = agent.process(input("hi")).await;

        assert_eq!(result.response_text, "Sorry, no answer");
        assert_eq!(result.outcome, Outcome::Error);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(engine.sent().is_empty());
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_receive_target_sends_but_does_not_wait() {
        let pending = Arc::new(PendingTable::new());
        let engine = Arc::new(FakeEngine::new(pending.clone()));
        let sink = Arc::new(CollectingSink::default());
        let agent = agent(settings("x", "", 30), pending, engine.clone(), sink);

        let started = Instant::now();
        let result = agent.process(input("hi")).await;

        assert_eq!(result.outcome, Outcome::Error);
        assert_eq!(result.response_text, "Sorry, no answer");
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(engine.sent().len(), 1);
    }

    #[tokio::test]
    async fn transport_fault_resolves_to_fallback() {
        let pending = Arc::new(PendingTable::new());
        let mut engine = FakeEngine::new(pending.clone());
        engine.fail = true;
        let engine = Arc::new(engine);
        let sink = Arc::new(CollectingSink::default());
        let agent = agent(settings("x", "y", 30), pending.clone(), engine, sink.clone());

        let started = Instant::now();
        let result = agent.process(input("hi")).await;

        assert_eq!(result.outcome, Outcome::Error);
        assert_eq!(result.response_text, "Sorry, no answer");
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(pending.waiting(), 0);
        assert_eq!(
            sink.events.lock().unwrap()[0].1["response"],
            "Sorry, no answer"
        );
    }

    #[tokio::test]
    async fn outbound_payload_carries_ids_and_satellite() {
        let pending = Arc::new(PendingTable::new());
        let mut engine = FakeEngine::new(pending.clone());
        engine.reply = Some((Duration::from_millis(10), |_| "ok".to_string()));
        let engine = Arc::new(engine);
        let sink = Arc::new(CollectingSink::default());
        let agent = agent(settings("noderedsend", "y", 5), pending, engine.clone(), sink);

        let result = agent
            .process(ConversationInput {
                text: "lights on".to_string(),
                conversation_id: Some("conv-1".to_string()),
                satellite_id: Some("kitchen-sat".to_string()),
            })
            .await;
        assert_eq!(result.conversation_id, "conv-1");

        let sent = engine.sent();
        let (target, payload) = &sent[0];
        assert_eq!(target, "noderedsend");
        assert_eq!(payload.message, "lights on");
        assert_eq!(payload.conversation_id, "conv-1");
        assert_eq!(payload.satellite_id.as_deref(), Some("kitchen-sat"));
        assert_eq!(payload.request_id.len(), 32);
        assert_ne!(payload.request_id, payload.conversation_id);
    }

    #[tokio::test]
    async fn missing_conversation_id_is_generated_and_request_ids_are_fresh() {
        let pending = Arc::new(PendingTable::new());
        let mut engine = FakeEngine::new(pending.clone());
        engine.reply = Some((Duration::from_millis(10), |_| "ok".to_string()));
        let engine = Arc::new(engine);
        let sink = Arc::new(CollectingSink::default());
        let agent = agent(settings("x", "y", 5), pending, engine.clone(), sink);

        let first = agent.process(input("one")).await;
        assert_eq!(first.conversation_id.len(), 32);
        let second = agent
            .process(ConversationInput {
                text: "two".to_string(),
                conversation_id: Some(first.conversation_id.clone()),
                satellite_id: None,
            })
            .await;
        assert_eq!(second.conversation_id, first.conversation_id);

        let sent = engine.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1.conversation_id, sent[1].1.conversation_id);
        assert_ne!(sent[0].1.request_id, sent[1].1.request_id);
    }

    #[tokio::test]
    async fn simultaneous_conversations_resolve_independently() {
        let pending = Arc::new(PendingTable::new());
        let mut engine = FakeEngine::new(pending.clone());
        // Echo the message back so each caller can check it got its own reply.
        engine.reply = Some((Duration::from_millis(150), |p| format!("re: {}", p.message)));
        let engine = Arc::new(engine);
        let sink = Arc::new(CollectingSink::default());
        let agent = Arc::new(agent(settings("x", "y", 5), pending.clone(), engine, sink));

        let a = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.process(input("alpha")).await })
        };
        let b = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.process(input("beta")).await })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a.response_text, "re: alpha");
        assert_eq!(b.response_text, "re: beta");
        assert_ne!(a.conversation_id, b.conversation_id);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn updated_settings_apply_to_next_turn() {
        let pending = Arc::new(PendingTable::new());
        let engine = Arc::new(FakeEngine::new(pending.clone()));
        let sink = Arc::new(CollectingSink::default());
        let store = settings("", "y", 30);
        let agent = agent(store.clone(), pending, engine.clone(), sink);

        agent.process(input("first")).await;
        assert!(engine.sent().is_empty());

        let mut s = store.get("default").unwrap();
        s.send_target = "now-set".to_string();
        s.receive_target = String::new();
        store.set("default".to_string(), s).unwrap();
        agent.process(input("second")).await;
        assert_eq!(engine.sent()[0].0, "now-set");
    }
}
