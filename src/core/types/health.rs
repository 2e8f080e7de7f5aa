//! Provider health reporting

use serde::{Deserialize, Serialize};

/// Point-in-time health of one inference backend.
///
/// Recomputed on every probe, never cached on the provider. GPU figures are
/// merged in from external collectors when available; the adapters themselves
/// only fill reachability, load state, and the active model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Whether the server answered the probe
    pub reachable: bool,
    /// Whether a model is loaded and ready to serve
    pub model_loaded: bool,
    /// Identifier of the currently active model
    pub active_model: Option<String>,
    /// GPU utilization percentage, externally collected
    pub gpu_utilization_percent: Option<f64>,
    /// Free VRAM in megabytes, externally collected
    pub vram_free_mb: Option<u64>,
    /// Recent average generation throughput
    pub avg_tokens_per_second: Option<f64>,
}

impl ProviderHealth {
    /// Health of a backend that did not answer the probe.
    pub fn unreachable() -> Self {
        Self::default()
    }

    /// True when the backend can accept an inference request right now.
    pub fn is_ready(&self) -> bool {
        self.reachable && self.model_loaded
    }
}
