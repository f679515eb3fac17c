use serde::{Deserialize, Serialize};

/// Canonical event names emitted by the processor.
///
/// Sinks and subscription filters only ever see these names; the raw
/// protocol-library type names never cross the processor boundary.
pub mod events {
    pub const MESSAGE: &str = "Message";
    pub const RECEIPT: &str = "Receipt";
    pub const PRESENCE: &str = "Presence";
    pub const CHAT_PRESENCE: &str = "ChatPresence";
    pub const GROUP_INFO: &str = "GroupInfo";
    pub const CALL_OFFER: &str = "CallOffer";
    pub const CONNECTED: &str = "Connected";
    pub const DISCONNECTED: &str = "Disconnected";
    pub const LOGGED_OUT: &str = "LoggedOut";

    /// Subscription wildcard: matches every canonical event.
    pub const ALL: &str = "All";
}

/// Opaque descriptor for downloadable media referenced by a message.
///
/// Recorded by the event processor so a later on-demand download call can
/// resolve the message id without re-reading protocol state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub message_id: String,
    pub direct_path: String,
    pub media_key: String,
    pub mime_type: String,
    pub byte_length: u64,
}

/// Canonical message shape, after structural variants are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    /// Chat the message belongs to (group or direct).
    pub chat: String,
    /// Counterpart identity that sent the message.
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Single text field; `conversation` and `extended text` raw shapes both
    /// land here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    pub from_me: bool,
    pub timestamp_ms: u64,
}

/// Immutable value passed from the event processor to every sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    pub tenant_id: String,
    pub timestamp_ms: u64,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(
        event: impl Into<String>,
        tenant_id: impl Into<String>,
        timestamp_ms: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event: event.into(),
            tenant_id: tenant_id.into(),
            timestamp_ms,
            payload,
        }
    }

    /// Deserialize the payload as a normalized message, if it is one.
    pub fn as_message(&self) -> Option<NormalizedMessage> {
        if self.event != events::MESSAGE {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}
