use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    tokio::sync::RwLock,
    tracing::debug,
    waygate_common::GatewayError,
    waygate_config::WaygateConfig,
    waygate_sessions::SessionRecord,
};

use crate::{
    GatewayDeps,
    crm::CrmBridgeSink,
    dispatch::DispatchSink,
    handle::ConnectionHandle,
    pairing::PairingPresenter,
    processor::EventProcessor,
    webhook::WebhookSink,
};

/// Concurrency-safe map from tenant id to its live connection handle.
///
/// Handles are created lazily and removed on stop/logout. The map lock is
/// held only for map access, never across repository or protocol calls, so
/// a slow tenant can't stall lookups for the others.
pub struct SessionRegistry {
    deps: GatewayDeps,
    config: WaygateConfig,
    http: reqwest::Client,
    handles: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
}

impl SessionRegistry {
    pub fn new(deps: GatewayDeps, config: WaygateConfig) -> Arc<Self> {
        Arc::new(Self {
            deps,
            config,
            http: reqwest::Client::new(),
            handles: RwLock::new(HashMap::new()),
        })
    }

    /// Read-only lookup.
    pub async fn get(&self, tenant_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.handles.read().await.get(tenant_id).cloned()
    }

    /// Return the existing handle or construct one from the persisted
    /// record. Fails with `SessionNotFound` (creating nothing) when the
    /// repository has no record for the tenant.
    ///
    /// Safe under concurrent calls for the same tenant: when two callers
    /// race past the read check, the first insert wins and the loser's
    /// freshly-built handle is discarded unstarted.
    pub async fn get_or_create(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<ConnectionHandle>, GatewayError> {
        if let Some(handle) = self.get(tenant_id).await {
            return Ok(handle);
        }

        let record = self
            .deps
            .repo
            .get(tenant_id)
            .await?
            .ok_or_else(|| GatewayError::SessionNotFound(tenant_id.to_string()))?;
        let handle = self.build_handle(record).await?;

        let mut handles = self.handles.write().await;
        Ok(Arc::clone(
            handles
                .entry(tenant_id.to_string())
                .or_insert_with(|| handle),
        ))
    }

    /// Remove the handle from the registry. Does not stop it — the caller
    /// stops first, so nothing acts on a handle mid-teardown.
    pub async fn remove(&self, tenant_id: &str) -> Option<Arc<ConnectionHandle>> {
        let removed = self.handles.write().await.remove(tenant_id);
        if removed.is_some() {
            debug!(tenant = %tenant_id, "handle removed from registry");
        }
        removed
    }

    pub async fn tenant_ids(&self) -> Vec<String> {
        self.handles.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }

    async fn build_handle(
        &self,
        record: SessionRecord,
    ) -> Result<Arc<ConnectionHandle>, GatewayError> {
        let tenant_id = record.tenant_id.clone();

        let expected = record
            .bound_device_id
            .as_deref()
            .filter(|id| !id.is_empty());
        let device = self
            .deps
            .devices
            .load_or_create(expected)
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let client = self
            .deps
            .factory
            .create(&tenant_id, device)
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let webhook = Arc::new(WebhookSink::new(
            &tenant_id,
            self.http.clone(),
            record.webhook_url.clone(),
        ));
        let mut sinks: Vec<Arc<dyn DispatchSink>> = vec![webhook.clone()];
        if let Some(crm) = &self.deps.crm {
            sinks.push(Arc::new(CrmBridgeSink::new(Arc::clone(crm))));
        }

        let processor = Arc::new(EventProcessor::new(
            &tenant_id,
            record.subscribed_events.clone(),
            sinks,
            Duration::from_secs(self.config.dispatch.sink_timeout_secs),
            self.config.media_cache.capacity,
            Duration::from_secs(self.config.dispatch.throttle_window_secs),
        ));

        debug!(tenant = %tenant_id, "handle constructed");
        Ok(ConnectionHandle::new(
            tenant_id,
            client,
            Arc::clone(&self.deps.repo),
            Arc::clone(&self.deps.devices),
            processor,
            PairingPresenter::new(self.config.pairing.image_size),
            webhook,
        ))
    }
}
