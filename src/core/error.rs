//! Error taxonomy for the orchestration core.
//!
//! One error type covers all providers and orchestration layers; the variants
//! map one-to-one onto how a failure is handled:
//!
//! | Variant | Meaning | Advances failover |
//! |---------|---------|-------------------|
//! | Transport | Network failure or non-success status | Yes |
//! | Timeout | Deadline elapsed; equivalent to transport | Yes |
//! | Protocol | Mandatory reply field missing/unparseable | Yes |
//! | Configuration | Unregistered id, unset primary, invalid values | No — surfaced immediately |
//! | Capacity | Prompt cannot fit the context budget | No |
//! | Exhausted | Every candidate failed | Terminal |
//! | Cancelled | Caller cancelled the operation | No — never downgraded |

use thiserror::Error;

/// Result type alias for the orchestration core
pub type Result<T> = std::result::Result<T, LlmError>;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Network failure, connection refusal, or non-success HTTP status
    #[error("transport error from provider '{provider}': {message}")]
    Transport {
        /// Provider that failed
        provider: String,
        /// What happened
        message: String,
    },

    /// The per-provider or per-request deadline elapsed
    #[error("provider '{provider}' timed out after {seconds}s")]
    Timeout {
        /// Provider that timed out
        provider: String,
        /// Effective deadline in seconds
        seconds: u64,
    },

    /// A mandatory reply field was absent or unparseable
    #[error("protocol error from provider '{provider}': {message}")]
    Protocol {
        /// Provider whose reply could not be interpreted
        provider: String,
        /// What was missing or malformed, with payload context
        message: String,
    },

    /// Invalid configuration or a directly-referenced unregistered id
    #[error("configuration error: {message}")]
    Configuration {
        /// What is misconfigured
        message: String,
    },

    /// The context budget cannot hold the minimum required content even
    /// after truncation
    #[error(
        "prompt requires ~{required_tokens} tokens but only {available_tokens} fit the context budget"
    )]
    Capacity {
        /// Estimated tokens the prompt needs
        required_tokens: u32,
        /// Tokens the budget can actually hold
        available_tokens: u32,
    },

    /// Every failover candidate failed
    #[error("all providers failed, attempted in order: {}", attempted.join(", "))]
    Exhausted {
        /// Provider ids in the order they were attempted
        attempted: Vec<String>,
        /// The last underlying failure
        #[source]
        source: Option<Box<LlmError>>,
    },

    /// The caller cancelled the operation mid-flight
    #[error("operation against provider '{provider}' was cancelled")]
    Cancelled {
        /// Provider the cancelled call was addressed to
        provider: String,
    },
}

impl LlmError {
    /// Create a transport error
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(provider: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            provider: provider.into(),
            seconds,
        }
    }

    /// Create a protocol error
    pub fn protocol(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a capacity error
    pub fn capacity(required_tokens: u32, available_tokens: u32) -> Self {
        Self::Capacity {
            required_tokens,
            available_tokens,
        }
    }

    /// Create an exhaustion error from the attempted ids and the last cause
    pub fn exhausted(attempted: Vec<String>, source: Option<LlmError>) -> Self {
        Self::Exhausted {
            attempted,
            source: source.map(Box::new),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(provider: impl Into<String>) -> Self {
        Self::Cancelled {
            provider: provider.into(),
        }
    }

    /// Whether the failover loop may advance to the next candidate after
    /// this error. Configuration and capacity problems are caller-side and
    /// surface immediately; cancellation is never retried.
    pub fn is_failover_eligible(&self) -> bool {
        matches!(
            self,
            LlmError::Transport { .. } | LlmError::Timeout { .. } | LlmError::Protocol { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failover_eligibility() {
        assert!(LlmError::transport("a", "refused").is_failover_eligible());
        assert!(LlmError::timeout("a", 300).is_failover_eligible());
        assert!(LlmError::protocol("a", "missing content").is_failover_eligible());
        assert!(!LlmError::configuration("bad id").is_failover_eligible());
        assert!(!LlmError::capacity(900, 100).is_failover_eligible());
        assert!(!LlmError::cancelled("a").is_failover_eligible());
    }

    #[test]
    fn test_exhausted_names_every_attempt() {
        let err = LlmError::exhausted(
            vec!["local".into(), "gpu".into()],
            Some(LlmError::transport("gpu", "connection reset")),
        );
        let rendered = err.to_string();
        assert!(rendered.contains("local, gpu"));

        // The last cause stays reachable through the error chain.
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("connection reset"));
    }

    #[test]
    fn test_capacity_names_required_and_available() {
        let rendered = LlmError::capacity(1200, 256).to_string();
        assert!(rendered.contains("1200"));
        assert!(rendered.contains("256"));
    }
}
