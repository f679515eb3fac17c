use std::{sync::Arc, time::Duration};

use {
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    waygate_channel::DeviceStore,
    waygate_common::GatewayError,
    waygate_sessions::{SessionRepository, SessionStatus},
};

use crate::registry::SessionRegistry;

/// Outcome of a startup reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Tenants with a valid binding we attempted to reconnect.
    pub attempted: usize,
    /// Attempts that ended in `Connected`.
    pub connected: usize,
    /// Stale device bindings cleared.
    pub repaired: usize,
    /// Tenants with no binding, corrected to `Disconnected` and skipped.
    pub skipped: usize,
    /// Attempts that failed (logged, never aborting the sweep).
    pub failed: usize,
}

/// Reconciles persisted tenant state against actual device credentials at
/// boot, then brings valid tenants back up one at a time.
///
/// Reconnect attempts are paced by a fixed delay so a restart never slams
/// the protocol server with the whole tenant population at once.
pub struct StartupReconciler {
    repo: Arc<dyn SessionRepository>,
    devices: Arc<dyn DeviceStore>,
    registry: Arc<SessionRegistry>,
    inter_attempt_delay: Duration,
}

impl StartupReconciler {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        devices: Arc<dyn DeviceStore>,
        registry: Arc<SessionRegistry>,
        inter_attempt_delay: Duration,
    ) -> Self {
        Self {
            repo,
            devices,
            registry,
            inter_attempt_delay,
        }
    }

    /// Walk every previously-active record, repair stale state, reconnect
    /// the rest. A failure on one tenant never aborts the others.
    pub async fn reconcile_all(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, GatewayError> {
        let records = self.repo.list_active().await?;
        let known_devices = self.devices.device_ids().await.map_err(|e| {
            GatewayError::Storage(format!("device store unavailable: {e}"))
        })?;

        let mut summary = ReconcileSummary::default();
        info!(tenants = records.len(), "startup reconciliation begins");

        for record in records {
            if cancel.is_cancelled() {
                info!("reconciliation cancelled");
                break;
            }
            let tenant_id = record.tenant_id.clone();

            // No device identity: the tenant never finished pairing.
            if !record.has_device() {
                self.correct_status(&tenant_id).await;
                summary.skipped += 1;
                continue;
            }

            // Binding points at a credential the device store no longer has.
            let bound = record.bound_device_id.clone().unwrap_or_default();
            if !known_devices.contains(&bound) {
                let stale = GatewayError::DeviceBindingStale {
                    tenant: tenant_id.clone(),
                    device_id: bound,
                };
                warn!(error = %stale, "repairing stale binding");
                if let Err(e) = self.repo.set_bound_device(&tenant_id, None).await {
                    warn!(tenant = %tenant_id, error = %e, "failed to clear stale binding");
                }
                self.correct_status(&tenant_id).await;
                summary.repaired += 1;
                continue;
            }

            if summary.attempted > 0 {
                tokio::time::sleep(self.inter_attempt_delay).await;
            }
            summary.attempted += 1;
            match self.reconnect(&tenant_id).await {
                Ok(SessionStatus::Connected) => summary.connected += 1,
                Ok(status) => {
                    warn!(tenant = %tenant_id, status = %status, "reconnect did not connect");
                    summary.failed += 1;
                },
                Err(e) => {
                    warn!(tenant = %tenant_id, error = %e, "reconnect failed");
                    summary.failed += 1;
                },
            }
        }

        info!(
            attempted = summary.attempted,
            connected = summary.connected,
            repaired = summary.repaired,
            skipped = summary.skipped,
            failed = summary.failed,
            "startup reconciliation finished"
        );
        Ok(summary)
    }

    async fn reconnect(&self, tenant_id: &str) -> Result<SessionStatus, GatewayError> {
        let handle = self.registry.get_or_create(tenant_id).await?;
        handle.start().await
    }

    async fn correct_status(&self, tenant_id: &str) {
        if let Err(e) = self
            .repo
            .set_status(tenant_id, SessionStatus::Disconnected)
            .await
        {
            warn!(tenant = %tenant_id, error = %e, "failed to correct status");
        }
    }
}
