//! Gateway core: session registry, connection state machines, event dispatch.
//!
//! Lifecycle:
//! 1. Load config, open the session repository and device store
//! 2. Build a [`SessionRegistry`] over a protocol [`ClientFactory`]
//! 3. Run startup reconciliation to bring previously-active tenants back up
//! 4. Drive tenants through start/pair/stop/logout via [`GatewayService`]
//! 5. Inbound protocol events normalize into envelopes and fan out to sinks
//!
//! The wire protocol, persistence, and the management HTTP/CLI surface live
//! behind trait seams in other crates; nothing here depends on a concrete
//! protocol library.

pub mod crm;
pub mod dispatch;
pub mod handle;
pub mod media;
pub mod pairing;
pub mod processor;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod throttle;
pub mod webhook;

use std::sync::Arc;

use waygate_channel::{ClientFactory, CrmBridge, DeviceStore};
use waygate_sessions::SessionRepository;

pub use {
    handle::ConnectionHandle,
    pairing::{PairingPresenter, RenderedPairingCode},
    processor::EventProcessor,
    reconcile::{ReconcileSummary, StartupReconciler},
    registry::SessionRegistry,
    service::GatewayService,
};

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// External collaborators the registry wires into every connection handle.
#[derive(Clone)]
pub struct GatewayDeps {
    pub repo: Arc<dyn SessionRepository>,
    pub devices: Arc<dyn DeviceStore>,
    pub factory: Arc<dyn ClientFactory>,
    /// CRM integration; when absent, only the webhook sink is wired.
    pub crm: Option<Arc<dyn CrmBridge>>,
}
