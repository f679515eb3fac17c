use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Tenant lifecycle status.
///
/// Persisted as a lowercase snake_case string. `LoggedOut` is terminal and
/// only reachable through an explicit logout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    PairingRequired,
    Connected,
    Error,
    LoggedOut,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::PairingRequired => "pairing_required",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::LoggedOut => "logged_out",
        }
    }

    /// Parse a persisted status string. Unknown values degrade to
    /// `Disconnected`; startup reconciliation re-derives the truth.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "connecting" => Self::Connecting,
            "pairing_required" => Self::PairingRequired,
            "connected" => Self::Connected,
            "error" => Self::Error,
            "logged_out" => Self::LoggedOut,
            _ => Self::Disconnected,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable state for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub tenant_id: String,
    pub status: SessionStatus,
    /// Device identity assigned at pairing. Empty until a device is bound.
    #[serde(default)]
    pub bound_device_id: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Canonical event names this tenant subscribes to. Empty means all.
    #[serde(default)]
    pub subscribed_events: Vec<String>,
    /// Whether startup reconciliation should bring this tenant back up.
    #[serde(default)]
    pub active: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl SessionRecord {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            tenant_id: tenant_id.into(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    /// Whether a device identity has been provisioned for this tenant.
    pub fn has_device(&self) -> bool {
        self.bound_device_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            SessionStatus::Disconnected,
            SessionStatus::Connecting,
            SessionStatus::PairingRequired,
            SessionStatus::Connected,
            SessionStatus::Error,
            SessionStatus::LoggedOut,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_degrades_to_disconnected() {
        assert_eq!(SessionStatus::parse("hibernating"), SessionStatus::Disconnected);
        assert_eq!(SessionStatus::parse(""), SessionStatus::Disconnected);
    }

    #[test]
    fn empty_binding_counts_as_no_device() {
        let mut record = SessionRecord::new("t1");
        assert!(!record.has_device());
        record.bound_device_id = Some(String::new());
        assert!(!record.has_device());
        record.bound_device_id = Some("dev-1".into());
        assert!(record.has_device());
    }
}
