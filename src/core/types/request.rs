//! Canonical completion request

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::message::ChatMessage;
use crate::core::error::{LlmError, Result};

/// Desired shape of the generated text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Free-form text
    #[default]
    Text,
    /// Force a JSON object reply where the backend supports it
    Json,
}

/// Backend-agnostic chat completion request.
///
/// Every adapter translates this canonical shape into its backend's wire
/// format. Field ranges are enforced by [`ChatRequest::validate`], which the
/// client manager calls before dispatch.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Target model identifier; when empty the provider's configured default
    /// model is used
    pub model: String,
    /// Ordered conversation, must be non-empty
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature in `[0, 2]`
    pub temperature: f32,
    /// Maximum tokens to generate, must be positive
    pub max_output_tokens: u32,
    /// Nucleus sampling threshold in `(0, 1]`
    pub top_p: f32,
    /// Optional repetition penalty factor
    pub repetition_penalty: Option<f32>,
    /// Sequences that terminate generation
    pub stop_sequences: Vec<String>,
    /// Desired response format
    pub response_format: ResponseFormat,
    /// Per-request timeout overriding the provider default
    pub timeout: Option<Duration>,
}

impl ChatRequest {
    /// Default sampling temperature for code generation workloads.
    pub const DEFAULT_TEMPERATURE: f32 = 0.2;
    /// Default generation budget.
    pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;
    /// Default nucleus sampling threshold.
    pub const DEFAULT_TOP_P: f32 = 0.95;

    /// Create a request with default sampling parameters.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: Self::DEFAULT_TEMPERATURE,
            max_output_tokens: Self::DEFAULT_MAX_OUTPUT_TOKENS,
            top_p: Self::DEFAULT_TOP_P,
            repetition_penalty: None,
            stop_sequences: Vec::new(),
            response_format: ResponseFormat::Text,
            timeout: None,
        }
    }

    /// Check the canonical invariants: non-empty conversation, temperature in
    /// `[0, 2]`, positive output budget, top-p in `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(LlmError::configuration("request has no messages"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(LlmError::configuration(format!(
                "temperature {} is outside [0, 2]",
                self.temperature
            )));
        }
        if self.max_output_tokens == 0 {
            return Err(LlmError::configuration("max_output_tokens must be positive"));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(LlmError::configuration(format!(
                "top_p {} is outside (0, 1]",
                self.top_p
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChatRequest {
        ChatRequest::new("qwen2.5-coder", vec![ChatMessage::user("hi")])
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_empty_messages_rejected() {
        let req = ChatRequest::new("m", Vec::new());
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_temperature_range() {
        let mut req = request();
        req.temperature = 2.0;
        assert!(req.validate().is_ok());
        req.temperature = 2.1;
        assert!(req.validate().is_err());
        req.temperature = -0.1;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_top_p_range() {
        let mut req = request();
        req.top_p = 1.0;
        assert!(req.validate().is_ok());
        req.top_p = 0.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_zero_output_budget_rejected() {
        let mut req = request();
        req.max_output_tokens = 0;
        assert!(req.validate().is_err());
    }
}
