//! Model metadata

use serde::{Deserialize, Serialize};

/// Best-effort description of a model hosted by a provider.
///
/// Every field except `model_id` is optional on the wire; adapters fill safe
/// defaults for anything the backend does not report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier
    pub model_id: String,
    /// Context window size in tokens
    pub context_window_tokens: u32,
    /// Quantization format (e.g. "Q4_K_M"), "unknown" when unreported
    pub quantization: String,
    /// Raw parameter count, 0 when unreported
    pub parameter_count: u64,
    /// Estimated VRAM usage in megabytes, 0 when unreported
    pub vram_usage_mb: u64,
    /// Whether the model is currently loaded
    pub loaded: bool,
}

impl ModelDescriptor {
    /// Fallback descriptor for a backend that answered nothing useful.
    pub fn fallback(model_id: impl Into<String>, context_window_tokens: u32) -> Self {
        Self {
            model_id: model_id.into(),
            context_window_tokens,
            quantization: "unknown".to_string(),
            parameter_count: 0,
            vram_usage_mb: 0,
            loaded: false,
        }
    }
}

/// Parses a human parameter-size label such as "7B" or "470M" into a raw
/// count. Unparseable input yields 0.
pub fn parse_parameter_size(size: &str) -> u64 {
    let trimmed = size.trim().to_ascii_uppercase();
    if trimmed.is_empty() {
        return 0;
    }
    let (digits, multiplier) = if let Some(rest) = trimmed.strip_suffix('B') {
        (rest, 1_000_000_000_f64)
    } else if let Some(rest) = trimmed.strip_suffix('M') {
        (rest, 1_000_000_f64)
    } else {
        (trimmed.as_str(), 1_f64)
    };
    digits
        .trim()
        .parse::<f64>()
        .map(|value| (value * multiplier) as u64)
        .unwrap_or(0)
}
