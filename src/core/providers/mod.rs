//! Backend providers.
//!
//! One [`Provider`] handle per configured backend, dispatching on
//! [`BackendKind`] into the wire-protocol adapter modules. The kinds are a
//! tagged variant, not a trait hierarchy: every arm implements the same
//! five-operation capability set (complete, complete_streaming, check_health,
//! model_info, ensure_model_loaded) and nothing else.

pub(crate) mod http;
mod llama_cpp;
mod ollama;
mod openai;
mod vllm;

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::ProviderDescriptor;
use crate::core::error::Result;
use crate::core::streaming::TokenStream;
use crate::core::types::{ChatRequest, ChatResponse, ModelDescriptor, ProviderHealth};

/// Context window assumed when neither the backend nor the descriptor
/// reports one.
pub const DEFAULT_CONTEXT_WINDOW_TOKENS: u32 = 4096;

/// Family of wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Ollama server (`/api/chat`, newline-delimited JSON streaming)
    Ollama,
    /// Generic OpenAI-compatible server (TGI, LocalAI, LM Studio, ...)
    OpenAiCompatible,
    /// vLLM server (OpenAI-compatible API plus dedicated health endpoint)
    Vllm,
    /// llama.cpp HTTP server (`/completion` with a templated raw prompt)
    LlamaCpp,
}

impl BackendKind {
    /// Configuration-file name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ollama => "ollama",
            BackendKind::OpenAiCompatible => "openai_compatible",
            BackendKind::Vllm => "vllm",
            BackendKind::LlamaCpp => "llama_cpp",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live handle to one configured inference backend.
///
/// Owns a pooled HTTP client; holds no reference back to the client manager.
/// Health is always recomputed by [`Provider::check_health`], never stored.
#[derive(Debug)]
pub struct Provider {
    descriptor: ProviderDescriptor,
    endpoint: String,
    http: Client,
}

impl Provider {
    /// Build a provider from its descriptor, validating the endpoint and
    /// constructing the pooled client.
    pub fn from_descriptor(descriptor: ProviderDescriptor) -> Result<Self> {
        let endpoint = descriptor.endpoint()?;
        let http = http::build_client(descriptor.timeout_secs)?;
        Ok(Self {
            descriptor,
            endpoint,
            http,
        })
    }

    /// Unique provider id.
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Wire-protocol family.
    pub fn backend(&self) -> BackendKind {
        self.descriptor.backend
    }

    /// Model served when a request does not name one.
    pub fn default_model(&self) -> &str {
        &self.descriptor.model
    }

    /// The originating configuration.
    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    /// Context window from the descriptor override, falling back to the
    /// crate default.
    pub fn effective_context_window(&self) -> u32 {
        self.descriptor
            .context_window
            .unwrap_or(DEFAULT_CONTEXT_WINDOW_TOKENS)
    }

    /// Non-streaming completion in the backend's wire format.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        request.validate()?;
        match self.backend() {
            BackendKind::Ollama => ollama::complete(self, request).await,
            BackendKind::OpenAiCompatible => openai::complete(self, request).await,
            BackendKind::Vllm => vllm::complete(self, request).await,
            BackendKind::LlamaCpp => llama_cpp::complete(self, request).await,
        }
    }

    /// Streaming completion, decoded into the canonical chunk sequence.
    pub async fn complete_streaming(&self, request: &ChatRequest) -> Result<TokenStream> {
        request.validate()?;
        match self.backend() {
            BackendKind::Ollama => ollama::stream(self, request).await,
            BackendKind::OpenAiCompatible => openai::stream(self, request).await,
            BackendKind::Vllm => vllm::stream(self, request).await,
            BackendKind::LlamaCpp => llama_cpp::stream(self, request).await,
        }
    }

    /// Cheapest possible reachability and readiness probe. Never fails: any
    /// error yields an unreachable report.
    pub async fn check_health(&self) -> ProviderHealth {
        match self.backend() {
            BackendKind::Ollama => ollama::health(self).await,
            BackendKind::OpenAiCompatible => openai::health(self).await,
            BackendKind::Vllm => vllm::health(self).await,
            BackendKind::LlamaCpp => llama_cpp::health(self).await,
        }
    }

    /// Best-effort model metadata with safe defaults for anything the
    /// backend does not report.
    pub async fn model_info(&self) -> ModelDescriptor {
        match self.backend() {
            BackendKind::Ollama => ollama::model_info(self).await,
            BackendKind::OpenAiCompatible => openai::model_info(self).await,
            BackendKind::Vllm => vllm::model_info(self).await,
            BackendKind::LlamaCpp => llama_cpp::model_info(self).await,
        }
    }

    /// Trigger a pull/load where the backend supports it; elsewhere degrades
    /// to a health confirmation.
    pub async fn ensure_model_loaded(&self, model: &str) -> Result<bool> {
        match self.backend() {
            BackendKind::Ollama => ollama::ensure_model_loaded(self, model).await,
            BackendKind::OpenAiCompatible => openai::ensure_model_loaded(self).await,
            BackendKind::Vllm => vllm::ensure_model_loaded(self, model).await,
            BackendKind::LlamaCpp => llama_cpp::ensure_model_loaded(self).await,
        }
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Model the backend will serve for this request.
    pub(crate) fn effective_model<'a>(&'a self, request: &'a ChatRequest) -> &'a str {
        if request.model.is_empty() {
            &self.descriptor.model
        } else {
            &request.model
        }
    }

    /// Deadline in effect for this request, for timeout reporting.
    pub(crate) fn deadline_secs(&self, request: &ChatRequest) -> u64 {
        request
            .timeout
            .map(|t| t.as_secs())
            .unwrap_or(self.descriptor.timeout_secs)
    }

    /// Apply a per-request timeout override when the caller set one.
    pub(crate) fn apply_request_timeout(
        &self,
        builder: RequestBuilder,
        request: &ChatRequest,
    ) -> RequestBuilder {
        match request.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    /// Bound for health and metadata probes.
    pub(crate) fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.descriptor.health_timeout_secs)
    }
}
