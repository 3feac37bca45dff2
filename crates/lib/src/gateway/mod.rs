//! Gateway: the host side of the relay.
//!
//! Single HTTP port: health, conversation entry point, inbound webhook dispatch, and a
//! WebSocket that streams host events.

mod protocol;
mod server;
mod webhook;

pub use protocol::{Ack, InboundDelivery, ProcessParams};
pub use server::{build_state, router, run_gateway, GatewayState};
pub use webhook::{DeliveryHandler, WebhookHandler, WebhookRegistry, WebhookReply};
