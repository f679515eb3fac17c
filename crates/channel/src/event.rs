/// Raw inbound occurrences crossing the protocol-library boundary.
///
/// The variant set is deliberately wider than what the gateway republishes;
/// variants with no canonical mapping are dropped by the event processor.
#[derive(Debug, Clone)]
pub enum RawEvent {
    Message(RawMessage),
    Receipt(RawReceipt),
    Presence {
        from: String,
        unavailable: bool,
    },
    ChatPresence {
        chat: String,
        sender: String,
        state: String,
    },
    GroupInfo {
        chat: String,
        change: String,
    },
    CallOffer {
        from: String,
        call_id: String,
    },
    Connected,
    Disconnected {
        reason: Option<String>,
    },
    LoggedOut {
        reason: String,
    },
    KeepAliveTimeout,
    TemporaryBan {
        reason: String,
    },
    /// Anything the protocol library emits that this layer does not model.
    /// Carries the library's type name for diagnostics.
    Unknown(String),
}

impl RawEvent {
    /// Protocol-level type name, used for classification diagnostics.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Message(_) => "Message",
            Self::Receipt(_) => "Receipt",
            Self::Presence { .. } => "Presence",
            Self::ChatPresence { .. } => "ChatPresence",
            Self::GroupInfo { .. } => "GroupInfo",
            Self::CallOffer { .. } => "CallOffer",
            Self::Connected => "Connected",
            Self::Disconnected { .. } => "Disconnected",
            Self::LoggedOut { .. } => "LoggedOut",
            Self::KeepAliveTimeout => "KeepAliveTimeout",
            Self::TemporaryBan { .. } => "TemporaryBan",
            Self::Unknown(name) => name,
        }
    }
}

/// An inbound message as the protocol library hands it over.
///
/// Text arrives in one of two structural shapes: a plain `conversation`
/// string or an `extended_text` block (links, mentions, quoted replies).
/// Both represent the same logical text message; normalization merges them.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub id: String,
    pub chat: String,
    pub sender: String,
    pub push_name: Option<String>,
    pub from_me: bool,
    pub timestamp_ms: u64,
    pub conversation: Option<String>,
    pub extended_text: Option<RawExtendedText>,
    pub media: Option<RawMedia>,
}

#[derive(Debug, Clone, Default)]
pub struct RawExtendedText {
    pub text: String,
    pub quoted_message_id: Option<String>,
}

/// Downloadable media attached to a raw message.
#[derive(Debug, Clone, Default)]
pub struct RawMedia {
    pub direct_path: String,
    pub media_key: String,
    pub mime_type: String,
    pub byte_length: u64,
    pub caption: Option<String>,
}

/// Delivery/read receipt.
#[derive(Debug, Clone, Default)]
pub struct RawReceipt {
    pub chat: String,
    pub sender: String,
    pub message_ids: Vec<String>,
    /// "delivered" or "read".
    pub kind: String,
    pub timestamp_ms: u64,
}

/// Events on the QR pairing stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// A fresh code to display. Codes rotate until one is scanned.
    Code(String),
    /// Pairing completed; the server assigned a device identity.
    Success { device_id: String },
    /// The pairing window closed without a scan.
    Timeout,
    /// The credential exchange was rejected.
    Error(String),
}
