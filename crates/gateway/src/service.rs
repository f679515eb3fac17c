use std::{sync::Arc, time::Duration};

use {
    tokio_util::sync::CancellationToken,
    tracing::info,
    waygate_channel::ClientHealthSnapshot,
    waygate_common::GatewayError,
    waygate_config::WaygateConfig,
    waygate_sessions::SessionStatus,
};

use crate::{
    GatewayDeps,
    pairing::RenderedPairingCode,
    reconcile::{ReconcileSummary, StartupReconciler},
    registry::SessionRegistry,
};

/// Management surface consumed by the (out-of-tree) HTTP/CLI layer.
///
/// Thin delegation over the registry and handles: synchronous failures come
/// back as typed errors, absorbed failures surface as the returned status.
pub struct GatewayService {
    deps: GatewayDeps,
    config: WaygateConfig,
    registry: Arc<SessionRegistry>,
}

impl GatewayService {
    pub fn new(deps: GatewayDeps, config: WaygateConfig) -> Self {
        let registry = SessionRegistry::new(deps.clone(), config.clone());
        Self {
            deps,
            config,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Bring a tenant up. Returns the resulting status: `Connected`,
    /// `PairingRequired` when no device is bound yet, or `Disconnected`
    /// when the connect attempt failed (caller may retry).
    pub async fn start_client(&self, tenant_id: &str) -> Result<SessionStatus, GatewayError> {
        let handle = self.registry.get_or_create(tenant_id).await?;
        let status = handle.start().await?;
        self.deps.repo.set_active(tenant_id, true).await?;
        Ok(status)
    }

    /// Stop a tenant's connection and mark it inactive so reconciliation
    /// leaves it down. Stopping an unknown-but-persisted tenant is a no-op;
    /// a tenant with no record at all fails with `SessionNotFound`.
    pub async fn stop_client(&self, tenant_id: &str) -> Result<(), GatewayError> {
        match self.registry.get(tenant_id).await {
            Some(handle) => {
                handle.stop().await?;
            },
            None => {
                self.deps
                    .repo
                    .get(tenant_id)
                    .await?
                    .ok_or_else(|| GatewayError::SessionNotFound(tenant_id.to_string()))?;
            },
        }
        self.deps.repo.set_active(tenant_id, false).await?;
        Ok(())
    }

    /// Log a tenant out: invalidate its device binding everywhere and
    /// remove the handle. The session record itself stays (deletion is a
    /// repository-level operation above this layer).
    pub async fn logout_client(&self, tenant_id: &str) -> Result<(), GatewayError> {
        let handle = self.registry.get_or_create(tenant_id).await?;
        handle.logout().await?;
        self.registry.remove(tenant_id).await;
        self.deps.repo.set_active(tenant_id, false).await?;
        info!(tenant = %tenant_id, "logout complete, handle removed");
        Ok(())
    }

    pub async fn is_connected(&self, tenant_id: &str) -> bool {
        match self.registry.get(tenant_id).await {
            Some(handle) => handle.is_connected(),
            None => false,
        }
    }

    /// Current pairing code for a tenant mid-pairing. Fails with
    /// `NoPairingCode` before any code has been generated — never blocks.
    pub async fn get_pairing_code(
        &self,
        tenant_id: &str,
    ) -> Result<RenderedPairingCode, GatewayError> {
        let handle = self
            .registry
            .get(tenant_id)
            .await
            .ok_or_else(|| GatewayError::NoPairingCode(tenant_id.to_string()))?;
        handle.pairing_code()
    }

    /// One-shot phone-number pairing.
    pub async fn pair_by_phone(
        &self,
        tenant_id: &str,
        phone_number: &str,
    ) -> Result<String, GatewayError> {
        let handle = self.registry.get_or_create(tenant_id).await?;
        handle.pair_phone(phone_number).await
    }

    /// Reconcile persisted sessions against device credentials and bring
    /// previously-active tenants back up, paced by the configured delay.
    pub async fn reconcile_on_startup(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, GatewayError> {
        let reconciler = StartupReconciler::new(
            Arc::clone(&self.deps.repo),
            Arc::clone(&self.deps.devices),
            Arc::clone(&self.registry),
            Duration::from_millis(self.config.reconcile.inter_attempt_delay_ms),
        );
        reconciler.reconcile_all(cancel).await
    }

    /// Replace a tenant's subscription filter, both persisted and live.
    pub async fn update_subscribed_events(
        &self,
        tenant_id: &str,
        events: Vec<String>,
    ) -> Result<(), GatewayError> {
        self.deps
            .repo
            .get(tenant_id)
            .await?
            .ok_or_else(|| GatewayError::SessionNotFound(tenant_id.to_string()))?;
        self.deps
            .repo
            .set_subscribed_events(tenant_id, &events)
            .await?;
        if let Some(handle) = self.registry.get(tenant_id).await {
            handle.set_subscriptions(events);
        }
        Ok(())
    }

    /// Replace a tenant's webhook target, both persisted and live.
    pub async fn update_webhook_url(
        &self,
        tenant_id: &str,
        url: Option<String>,
    ) -> Result<(), GatewayError> {
        self.deps
            .repo
            .get(tenant_id)
            .await?
            .ok_or_else(|| GatewayError::SessionNotFound(tenant_id.to_string()))?;
        self.deps.repo.set_webhook_url(tenant_id, url.as_deref()).await?;
        if let Some(handle) = self.registry.get(tenant_id).await {
            handle.set_webhook_url(url);
        }
        Ok(())
    }

    /// Tenants whose protocol client is currently connected.
    pub async fn connected_tenants(&self) -> Vec<String> {
        let mut connected = Vec::new();
        for tenant_id in self.registry.tenant_ids().await {
            if let Some(handle) = self.registry.get(&tenant_id).await
                && handle.is_connected()
            {
                connected.push(tenant_id);
            }
        }
        connected.sort();
        connected
    }

    /// Health snapshot for one tenant's live handle.
    pub async fn health(&self, tenant_id: &str) -> Option<ClientHealthSnapshot> {
        self.registry.get(tenant_id).await.map(|h| h.health())
    }
}
