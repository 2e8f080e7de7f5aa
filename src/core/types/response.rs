//! Canonical completion responses and streaming chunks

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token accounting for a completed or streamed inference call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u32,
    /// Tokens generated by the model
    pub completion_tokens: u32,
    /// Sum of prompt and completion tokens
    pub total_tokens: u32,
    /// Observed generation throughput, when the backend reports timings
    pub tokens_per_second: Option<f64>,
}

impl Usage {
    /// Build a usage record; the total is always `prompt + completion`.
    pub fn new(prompt_tokens: u32, completion_tokens: u32, tokens_per_second: Option<f64>) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            tokens_per_second,
        }
    }

    /// Zeroed usage for backends that report nothing.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Full (non-streaming) completion result.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated text
    pub content: String,
    /// Token accounting
    pub usage: Usage,
    /// Wall-clock duration of the inference call
    pub duration: Duration,
    /// Backend-reported finish reason (e.g. "stop", "length")
    pub finish_reason: Option<String>,
    /// Model identifier the backend actually served
    pub served_model: Option<String>,
}

/// One element of a decoded token stream.
///
/// A decoded sequence is finite, strictly ordered, single-traversal, and ends
/// exactly once with `is_final == true`; only that final chunk carries usage.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenChunk {
    /// Generated text fragment, possibly empty on the final chunk
    pub text: String,
    /// Whether this chunk terminates the sequence
    pub is_final: bool,
    /// Usage, present only when `is_final` is set
    pub usage: Option<Usage>,
}

impl TokenChunk {
    /// An intermediate text fragment.
    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            usage: None,
        }
    }

    /// The terminating chunk of a stream.
    pub fn terminal(text: impl Into<String>, usage: Usage) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            usage: Some(usage),
        }
    }
}
