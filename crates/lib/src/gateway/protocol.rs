//! Gateway HTTP wire types (inbound delivery, acknowledgements, process requests).

use serde::{Deserialize, Serialize};

/// Inbound webhook body from the automation engine: `{ "request_id", "response" }`.
/// Both fields are optional at the type level so missing fields can be reported as invalid input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundDelivery {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
}

/// Webhook acknowledgement: `{ "status": "ok" }` or `{ "status": "error", "message" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Body of `POST /api/conversation/process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessParams {
    pub text: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub satellite_id: Option<String>,
    /// Relay instance to use; the default instance when absent.
    #[serde(default)]
    pub agent_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_ack_omits_message() {
        assert_eq!(
            serde_json::to_value(Ack::ok()).unwrap(),
            serde_json::json!({ "status": "ok" })
        );
    }

    #[test]
    fn error_ack_carries_message() {
        assert_eq!(
            serde_json::to_value(Ack::error("Invalid data")).unwrap(),
            serde_json::json!({ "status": "error", "message": "Invalid data" })
        );
    }

    #[test]
    fn delivery_with_missing_fields_still_parses() {
        let d: InboundDelivery = serde_json::from_str(r#"{"request_id":"abc"}"#).unwrap();
        assert_eq!(d.request_id.as_deref(), Some("abc"));
        assert!(d.response.is_none());
    }

    #[test]
    fn delivery_with_non_string_field_is_rejected() {
        assert!(serde_json::from_str::<InboundDelivery>(r#"{"request_id":1,"response":"x"}"#).is_err());
    }
}
