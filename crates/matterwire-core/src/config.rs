// ── Runtime tuning ──
//
// Timing and sizing knobs for the background loops and the bridge.
// Core never reads config files; the embedding service builds a
// `BridgeConfig` (usually via `matterwire-config`) and hands it in.

use std::time::Duration;

/// Polling scheduler timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Delay between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Upper bound of the random delay before the first cycle.
    pub max_initial_jitter: Duration,
    /// Pause between two consecutive device reads within a cycle.
    pub inter_node_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_initial_jitter: Duration::from_secs(30),
            inter_node_delay: Duration::from_secs(1),
        }
    }
}

/// Discovery scanner timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerConfig {
    pub interval: Duration,
    pub inter_node_delay: Duration,
    /// Bound on a single discovery query.
    pub discovery_timeout: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            inter_node_delay: Duration::from_secs(1),
            discovery_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything the bridge needs at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    pub poller: PollerConfig,
    pub scanner: ScannerConfig,
    /// Capacity of the broadcast event channel.
    pub event_channel_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            scanner: ScannerConfig::default(),
            event_channel_size: 256,
        }
    }
}
