use std::{
    collections::HashSet,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use {
    once_cell::sync::Lazy,
    tracing::{debug, warn},
    waygate_channel::{RawEvent, RawMessage},
    waygate_common::{
        EventEnvelope, MediaRef, NormalizedMessage,
        event::events,
    },
};

use crate::{
    dispatch::{DispatchSink, dispatch_all},
    media::MediaRefCache,
    now_ms,
    throttle::LogThrottle,
};

/// Raw protocol types already reported as unmapped, so each is logged once
/// per process rather than once per occurrence.
static UNMAPPED_REPORTED: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Static table from raw protocol type to canonical event name.
/// Types with no entry are dropped at the boundary.
pub fn canonical_name(raw: &RawEvent) -> Option<&'static str> {
    match raw {
        RawEvent::Message(_) => Some(events::MESSAGE),
        RawEvent::Receipt(_) => Some(events::RECEIPT),
        RawEvent::Presence { .. } => Some(events::PRESENCE),
        RawEvent::ChatPresence { .. } => Some(events::CHAT_PRESENCE),
        RawEvent::GroupInfo { .. } => Some(events::GROUP_INFO),
        RawEvent::CallOffer { .. } => Some(events::CALL_OFFER),
        RawEvent::Connected => Some(events::CONNECTED),
        RawEvent::Disconnected { .. } => Some(events::DISCONNECTED),
        RawEvent::LoggedOut { .. } => Some(events::LOGGED_OUT),
        RawEvent::KeepAliveTimeout | RawEvent::TemporaryBan { .. } | RawEvent::Unknown(_) => None,
    }
}

/// Merge the structural variants of a raw message into the canonical shape.
///
/// `conversation` and `extended_text` carry the same logical text; exactly
/// one canonical `text` field survives. A media caption becomes the text
/// when no other text is present.
pub fn normalize_message(raw: RawMessage) -> NormalizedMessage {
    let caption = raw.media.as_ref().and_then(|m| m.caption.clone());
    let text = raw
        .conversation
        .or(raw.extended_text.map(|e| e.text))
        .or(caption);

    let media = raw.media.map(|m| MediaRef {
        message_id: raw.id.clone(),
        direct_path: m.direct_path,
        media_key: m.media_key,
        mime_type: m.mime_type,
        byte_length: m.byte_length,
    });

    NormalizedMessage {
        id: raw.id,
        chat: raw.chat,
        sender: raw.sender,
        sender_name: raw.push_name,
        text,
        media,
        from_me: raw.from_me,
        timestamp_ms: raw.timestamp_ms,
    }
}

/// Per-tenant pipeline from raw protocol callback to sink delivery.
///
/// Classify → filter → normalize → record media → fan out. Runs on the
/// handle's event pump, one event at a time, so sink delivery order matches
/// the order the protocol client emitted events.
pub struct EventProcessor {
    tenant_id: String,
    subscriptions: RwLock<Vec<String>>,
    sinks: Vec<Arc<dyn DispatchSink>>,
    sink_timeout: Duration,
    media: Mutex<MediaRefCache>,
    throttle: Mutex<LogThrottle>,
}

impl EventProcessor {
    pub fn new(
        tenant_id: impl Into<String>,
        subscriptions: Vec<String>,
        sinks: Vec<Arc<dyn DispatchSink>>,
        sink_timeout: Duration,
        media_capacity: usize,
        throttle_window: Duration,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            subscriptions: RwLock::new(subscriptions),
            sinks,
            sink_timeout,
            media: Mutex::new(MediaRefCache::new(media_capacity)),
            throttle: Mutex::new(LogThrottle::new(throttle_window)),
        }
    }

    /// Replace the tenant's subscription filter.
    pub fn set_subscriptions(&self, subscriptions: Vec<String>) {
        if let Ok(mut guard) = self.subscriptions.write() {
            *guard = subscriptions;
        }
    }

    /// Whether the tenant subscribes to `event`. An empty set and the
    /// wildcard name both match everything.
    pub fn subscribed(&self, event: &str) -> bool {
        let Ok(subs) = self.subscriptions.read() else {
            return true;
        };
        subs.is_empty() || subs.iter().any(|s| s == events::ALL || s == event)
    }

    /// Resolve a previously-seen media descriptor by message id.
    pub fn media_ref(&self, message_id: &str) -> Option<MediaRef> {
        self.media
            .lock()
            .map(|cache| cache.get(message_id))
            .unwrap_or_else(|e| e.into_inner().get(message_id))
    }

    /// Process one raw protocol callback end to end.
    pub async fn on_event(&self, raw: RawEvent) {
        let Some(event) = canonical_name(&raw) else {
            self.report_unmapped(raw.type_name());
            return;
        };

        self.log_event(event);

        if !self.subscribed(event) {
            return;
        }

        let envelope = self.build_envelope(event, raw);
        dispatch_all(&self.sinks, &envelope, self.sink_timeout).await;
    }

    fn build_envelope(&self, event: &'static str, raw: RawEvent) -> EventEnvelope {
        let (timestamp_ms, payload) = match raw {
            RawEvent::Message(msg) => {
                let normalized = normalize_message(msg);
                if let Some(media) = &normalized.media {
                    self.remember_media(media.clone());
                }
                (
                    normalized.timestamp_ms,
                    serde_json::to_value(&normalized).unwrap_or_default(),
                )
            },
            RawEvent::Receipt(receipt) => (
                receipt.timestamp_ms,
                serde_json::json!({
                    "chat": receipt.chat,
                    "sender": receipt.sender,
                    "message_ids": receipt.message_ids,
                    "kind": receipt.kind,
                    "timestamp_ms": receipt.timestamp_ms,
                }),
            ),
            RawEvent::Presence { from, unavailable } => (
                now_ms(),
                serde_json::json!({ "from": from, "unavailable": unavailable }),
            ),
            RawEvent::ChatPresence { chat, sender, state } => (
                now_ms(),
                serde_json::json!({ "chat": chat, "sender": sender, "state": state }),
            ),
            RawEvent::GroupInfo { chat, change } => {
                (now_ms(), serde_json::json!({ "chat": chat, "change": change }))
            },
            RawEvent::CallOffer { from, call_id } => (
                now_ms(),
                serde_json::json!({ "from": from, "call_id": call_id }),
            ),
            RawEvent::Connected => (now_ms(), serde_json::json!({})),
            RawEvent::Disconnected { reason } => {
                (now_ms(), serde_json::json!({ "reason": reason }))
            },
            RawEvent::LoggedOut { reason } => {
                (now_ms(), serde_json::json!({ "reason": reason }))
            },
            RawEvent::KeepAliveTimeout | RawEvent::TemporaryBan { .. } | RawEvent::Unknown(_) => {
                (now_ms(), serde_json::Value::Null)
            },
        };

        EventEnvelope::new(event, self.tenant_id.clone(), timestamp_ms, payload)
    }

    fn remember_media(&self, media: MediaRef) {
        match self.media.lock() {
            Ok(mut cache) => cache.insert(media),
            Err(poisoned) => poisoned.into_inner().insert(media),
        }
    }

    fn log_event(&self, event: &'static str) {
        match event {
            events::RECEIPT | events::PRESENCE | events::CHAT_PRESENCE => {
                let summary = match self.throttle.lock() {
                    Ok(mut throttle) => throttle.record(event),
                    Err(poisoned) => poisoned.into_inner().record(event),
                };
                if let Some(counts) = summary {
                    let rendered: Vec<String> =
                        counts.iter().map(|(name, n)| format!("{name}={n}")).collect();
                    debug!(tenant = %self.tenant_id, "{}", rendered.join(" "));
                }
            },
            _ => debug!(tenant = %self.tenant_id, event = %event, "inbound event"),
        }
    }

    fn report_unmapped(&self, type_name: &str) {
        let mut reported = match UNMAPPED_REPORTED.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if reported.insert(type_name.to_string()) {
            warn!(kind = %type_name, "dropping protocol event type with no canonical mapping");
        }
    }
}
