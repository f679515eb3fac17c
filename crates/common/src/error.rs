use thiserror::Error;

/// Error taxonomy shared across the workspace.
///
/// Synchronous API errors (`SessionNotFound`, `InvalidTenantState`, ...) are
/// returned to callers directly. Failures absorbed into a state transition
/// (failed connect attempt, pairing timeout) are logged where they happen and
/// surface only as the resulting status.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No persisted session record exists for the tenant.
    #[error("no session found for tenant {0}")]
    SessionNotFound(String),

    /// The operation requires an active connection.
    #[error("client for tenant {0} is not connected")]
    ClientNotConnected(String),

    /// The pairing window closed before a device was bound.
    #[error("pairing timed out for tenant {0}")]
    PairingTimeout(String),

    /// The credential exchange was rejected by the protocol server.
    #[error("pairing failed for tenant {tenant}: {reason}")]
    PairingFailed { tenant: String, reason: String },

    /// The operation is not valid in the tenant's current state.
    #[error("tenant {tenant} is {state}, cannot {operation}")]
    InvalidTenantState {
        tenant: String,
        state: String,
        operation: String,
    },

    /// A single sink failed to accept an envelope. Never fatal to the event.
    #[error("sink {sink} delivery failed: {reason}")]
    SinkDeliveryFailed { sink: String, reason: String },

    /// A persisted device binding no longer exists in the device store.
    #[error("tenant {tenant} has stale device binding {device_id}")]
    DeviceBindingStale { tenant: String, device_id: String },

    /// No pairing code has been generated yet.
    #[error("no pairing code available for tenant {0}")]
    NoPairingCode(String),

    /// Session repository failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Protocol client failure surfaced through a trait seam.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Stable machine-readable code, used by webhook payloads and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::ClientNotConnected(_) => "client_not_connected",
            Self::PairingTimeout(_) => "pairing_timeout",
            Self::PairingFailed { .. } => "pairing_failed",
            Self::InvalidTenantState { .. } => "invalid_tenant_state",
            Self::SinkDeliveryFailed { .. } => "sink_delivery_failed",
            Self::DeviceBindingStale { .. } => "device_binding_stale",
            Self::NoPairingCode(_) => "no_pairing_code",
            Self::Storage(_) => "storage_error",
            Self::Protocol(_) => "protocol_error",
        }
    }
}
