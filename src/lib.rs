//! # llmux
//!
//! Inference-orchestration core for local coding agents: one canonical way
//! to run chat completions against heterogeneous self-hosted LLM runtimes.
//!
//! ## Features
//!
//! - **Four backends, one contract**: Ollama, vLLM, llama.cpp, and generic
//!   OpenAI-compatible servers behind the same request/response shapes
//! - **Health-gated failover**: candidates are probed and tried in order;
//!   a failed completion names every provider it attempted
//! - **Streaming normalization**: SSE and newline-delimited JSON event
//!   streams decode into one canonical token-chunk sequence
//! - **Context budgeting**: heuristic token estimation and newest-first
//!   truncation keep prompts inside a model's window
//! - **Declarative routing**: ordered rules over prompt kind and task
//!   complexity pick a preferred backend without hardcoding
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use llmux::{ChatMessage, ChatRequest, ClientManager, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OrchestratorConfig::from_file("llm.yaml").await?;
//!     let manager = ClientManager::from_config(&config)?;
//!
//!     let request = ChatRequest::new(
//!         "qwen2.5-coder:7b",
//!         vec![
//!             ChatMessage::system("You are a careful Rust engineer."),
//!             ChatMessage::user("Write a binary search over &[i64]."),
//!         ],
//!     );
//!     let response = manager.complete_with_fallback(&request).await?;
//!     println!("{}", response.content);
//!     Ok(())
//! }
//! ```
//!
//! ## Routing
//!
//! ```rust,no_run
//! use llmux::{ClientManager, PromptKind, RequestRouter, RoutingRule};
//!
//! # async fn route(manager: &ClientManager, request: &llmux::ChatRequest)
//! # -> Result<(), llmux::LlmError> {
//! let router = RequestRouter::new(vec![RoutingRule::new(
//!     "task_complexity >= 'high'",
//!     "gpu-server",
//!     "heavy generation goes to the GPU box",
//! )]);
//! let preferred = router.resolve(manager, PromptKind::GenerateService, "high")?;
//! let response = manager.complete_routed(request, Some(&preferred)).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;

// Re-export the public surface at the crate root.
pub use config::{OrchestratorConfig, ProviderDescriptor};
pub use core::context::{ContextWindowManager, SAFETY_MARGIN_TOKENS, TokenEstimator};
pub use core::error::{LlmError, Result};
pub use core::manager::ClientManager;
pub use core::providers::{BackendKind, DEFAULT_CONTEXT_WINDOW_TOKENS, Provider};
pub use core::router::{COMPLEXITY_SCALE, RequestRouter, complexity_rank};
pub use core::streaming::{ByteStream, ChunkDecoder, StreamFraming, TokenStream};
pub use core::types::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, ModelDescriptor, PromptKind, ProviderHealth,
    ResponseFormat, RoutingRule, TokenChunk, Usage,
};

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Name of the crate
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(NAME, "llmux");
        assert!(!VERSION.is_empty());
    }
}
