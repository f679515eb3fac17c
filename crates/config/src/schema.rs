use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WaygateConfig {
    pub reconcile: ReconcileConfig,
    pub dispatch: DispatchConfig,
    pub pairing: PairingConfig,
    pub media_cache: MediaCacheConfig,
}

/// Startup reconciliation pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Delay between successive reconnect attempts, to avoid a storm
    /// against the protocol server after a restart.
    pub inter_attempt_delay_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            inter_attempt_delay_ms: 2_000,
        }
    }
}

/// Sink dispatch behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-sink delivery timeout.
    pub sink_timeout_secs: u64,

    /// Rolling window for the throttled receipt/presence log summary.
    pub throttle_window_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            sink_timeout_secs: 20,
            throttle_window_secs: 30,
        }
    }
}

/// Pairing code presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Minimum pixel size of the rendered PNG (square).
    pub image_size: u32,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self { image_size: 256 }
    }
}

/// Per-tenant media reference cache bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaCacheConfig {
    /// Max entries per tenant; oldest entries are evicted past this.
    pub capacity: usize,
}

impl Default for MediaCacheConfig {
    fn default() -> Self {
        Self { capacity: 1_024 }
    }
}
