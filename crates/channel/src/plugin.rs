use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    tokio::sync::mpsc,
    waygate_common::NormalizedMessage,
};

use crate::event::{PairingEvent, RawEvent};

/// A device credential set. `id` is `None` until a pairing completes and the
/// protocol server assigns one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: Option<String>,
}

impl DeviceIdentity {
    pub fn fresh() -> Self {
        Self { id: None }
    }

    pub fn bound(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }
}

/// One live protocol client. Each tenant's connection handle owns exactly one.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Attempt to establish the connection. Requires a registered device.
    async fn connect(&self) -> Result<()>;

    /// Tear down the connection. Safe to call when already disconnected.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Whether a device identity is registered (pairing already happened).
    fn is_registered(&self) -> bool;

    /// Raw inbound event stream. Single consumer; returns `None` once taken.
    fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<RawEvent>>;

    /// Open the QR pairing-event stream. The client enforces the pairing
    /// timeout and terminates the stream with [`PairingEvent::Timeout`].
    async fn pairing_stream(&self) -> Result<mpsc::Receiver<PairingEvent>>;

    /// Request a phone-number pairing code (one-shot, short alphanumeric).
    async fn pair_phone(&self, phone_number: &str) -> Result<String>;

    /// Invalidate the device registration on the protocol server.
    async fn logout(&self) -> Result<()>;

    /// Send primitive used by the out-of-scope feature wrappers.
    async fn send_text(&self, to: &str, text: &str) -> Result<()>;
}

/// Builds protocol clients bound to a tenant's device identity.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(
        &self,
        tenant_id: &str,
        device: DeviceIdentity,
    ) -> Result<Arc<dyn ProtocolClient>>;
}

/// Device credential storage underneath the protocol clients.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Load the identity with the expected id, or create a fresh one.
    async fn load_or_create(&self, device_id: Option<&str>) -> Result<DeviceIdentity>;

    /// Ids of every identity currently known to the store.
    async fn device_ids(&self) -> Result<Vec<String>>;

    /// Drop a stored identity (logout / stale-binding repair).
    async fn delete(&self, device_id: &str) -> Result<()>;
}

/// CRM integration consumed by the CRM bridge sink.
#[async_trait]
pub trait CrmBridge: Send + Sync {
    /// Register the tenant's CRM configuration. Idempotent.
    async fn register(&self, tenant_id: &str) -> Result<()>;

    /// Resolve the conversation for a tenant + counterpart pair, creating
    /// one when none exists. Returns the conversation id.
    async fn open_conversation(&self, tenant_id: &str, contact: &str) -> Result<String>;

    /// Append a normalized inbound message to a conversation.
    async fn append_message(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        message: &NormalizedMessage,
    ) -> Result<()>;
}

/// Client health snapshot.
#[derive(Debug, Clone)]
pub struct ClientHealthSnapshot {
    pub tenant_id: String,
    pub connected: bool,
    pub status: String,
    pub details: Option<String>,
}
