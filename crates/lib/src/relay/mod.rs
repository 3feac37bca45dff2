//! Relay agent: send a conversation turn to an external automation engine over a
//! webhook and wait for the correlated reply on the inbound webhook.

mod agent;
mod request;
mod sender;

pub use agent::{RelayAgent, RelayError};
pub use request::{ConversationInput, ConversationRequest, ConversationResult, Outcome};
pub use sender::{HttpWebhookSender, TransportError, WebhookSender};
