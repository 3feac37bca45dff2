//! Conversation input, outbound payload, and result types.

use serde::{Deserialize, Serialize};

/// One conversation turn as handed to the agent by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationInput {
    pub text: String,
    /// Stable across turns of one conversation; generated when absent.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Voice satellite that captured the input, if any.
    #[serde(default)]
    pub satellite_id: Option<String>,
}

/// Outbound webhook body: `{ request_id, message, conversation_id, satellite_id }`.
/// `satellite_id` is always present, `null` when unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRequest {
    pub request_id: String,
    pub message: String,
    pub conversation_id: String,
    pub satellite_id: Option<String>,
}

/// How the turn was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// A reply arrived on the inbound webhook.
    Success,
    /// No reply within the configured timeout.
    Timeout,
    /// Nothing was sent, the send failed, or no inbound webhook is configured.
    Error,
}

/// What the host gets back: always produced, never a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationResult {
    pub response_text: String,
    pub conversation_id: String,
    pub outcome: Outcome,
}
