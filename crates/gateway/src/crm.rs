use std::sync::Arc;

use {
    async_trait::async_trait,
    dashmap::{DashMap, DashSet},
    tracing::debug,
    waygate_channel::CrmBridge,
    waygate_common::{EventEnvelope, GatewayError, event::events},
};

use crate::dispatch::DispatchSink;

/// Forwards normalized messages into CRM conversations.
///
/// The tenant's CRM configuration is registered lazily on the first envelope
/// seen for that tenant, so a tenant provisioned after boot needs no extra
/// wiring. Conversation ids are resolved through the bridge once per
/// tenant+counterpart pair and cached.
pub struct CrmBridgeSink {
    bridge: Arc<dyn CrmBridge>,
    registered: DashSet<String>,
    conversations: DashMap<(String, String), String>,
}

impl CrmBridgeSink {
    pub fn new(bridge: Arc<dyn CrmBridge>) -> Self {
        Self {
            bridge,
            registered: DashSet::new(),
            conversations: DashMap::new(),
        }
    }

    fn sink_err(e: impl std::fmt::Display) -> GatewayError {
        GatewayError::SinkDeliveryFailed {
            sink: "crm".into(),
            reason: e.to_string(),
        }
    }

    async fn ensure_registered(&self, tenant_id: &str) -> Result<(), GatewayError> {
        if self.registered.contains(tenant_id) {
            return Ok(());
        }
        self.bridge
            .register(tenant_id)
            .await
            .map_err(Self::sink_err)?;
        self.registered.insert(tenant_id.to_string());
        debug!(tenant = %tenant_id, "CRM integration registered");
        Ok(())
    }

    async fn conversation_for(
        &self,
        tenant_id: &str,
        contact: &str,
    ) -> Result<String, GatewayError> {
        let key = (tenant_id.to_string(), contact.to_string());
        if let Some(id) = self.conversations.get(&key) {
            return Ok(id.clone());
        }
        let id = self
            .bridge
            .open_conversation(tenant_id, contact)
            .await
            .map_err(Self::sink_err)?;
        self.conversations.insert(key, id.clone());
        Ok(id)
    }
}

#[async_trait]
impl DispatchSink for CrmBridgeSink {
    fn name(&self) -> &str {
        "crm"
    }

    async fn deliver(&self, envelope: &EventEnvelope) -> Result<(), GatewayError> {
        // Only message content maps to CRM conversations.
        if envelope.event != events::MESSAGE {
            return Ok(());
        }
        let Some(message) = envelope.as_message() else {
            return Err(Self::sink_err("message envelope with malformed payload"));
        };

        self.ensure_registered(&envelope.tenant_id).await?;
        let conversation = self
            .conversation_for(&envelope.tenant_id, &message.chat)
            .await?;
        self.bridge
            .append_message(&envelope.tenant_id, &conversation, &message)
            .await
            .map_err(Self::sink_err)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use waygate_common::NormalizedMessage;

    use super::*;

    #[derive(Default)]
    struct FakeBridge {
        registrations: AtomicUsize,
        opened: AtomicUsize,
        appended: AtomicUsize,
    }

    #[async_trait]
    impl CrmBridge for FakeBridge {
        async fn register(&self, _tenant_id: &str) -> anyhow::Result<()> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn open_conversation(
            &self,
            tenant_id: &str,
            contact: &str,
        ) -> anyhow::Result<String> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(format!("conv:{tenant_id}:{contact}"))
        }

        async fn append_message(
            &self,
            _tenant_id: &str,
            _conversation_id: &str,
            _message: &NormalizedMessage,
        ) -> anyhow::Result<()> {
            self.appended.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn message_envelope(chat: &str) -> EventEnvelope {
        let msg = NormalizedMessage {
            id: "m1".into(),
            chat: chat.into(),
            sender: chat.into(),
            text: Some("hi".into()),
            timestamp_ms: 1,
            ..Default::default()
        };
        EventEnvelope::new(events::MESSAGE, "t1", 1, serde_json::to_value(msg).unwrap())
    }

    #[tokio::test]
    async fn registers_lazily_once_and_caches_conversation() {
        let bridge = Arc::new(FakeBridge::default());
        let sink = CrmBridgeSink::new(bridge.clone());

        sink.deliver(&message_envelope("alice@s")).await.unwrap();
        sink.deliver(&message_envelope("alice@s")).await.unwrap();
        sink.deliver(&message_envelope("bob@s")).await.unwrap();

        assert_eq!(bridge.registrations.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.opened.load(Ordering::SeqCst), 2);
        assert_eq!(bridge.appended.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn ignores_non_message_events() {
        let bridge = Arc::new(FakeBridge::default());
        let sink = CrmBridgeSink::new(bridge.clone());

        let env = EventEnvelope::new(events::RECEIPT, "t1", 1, serde_json::json!({}));
        sink.deliver(&env).await.unwrap();

        assert_eq!(bridge.registrations.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.appended.load(Ordering::SeqCst), 0);
    }
}
