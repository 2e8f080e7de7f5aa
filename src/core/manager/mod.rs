//! Client manager: provider registry, primary selection, health-gated
//! sequential failover.
//!
//! The manager owns the only shared mutable state in the crate — the
//! provider map and the primary pointer. Reads are lock-free
//! (`DashMap`/`ArcSwap`); registration and primary reassignment are atomic,
//! so readers never observe a partially-registered provider. Health probes
//! may fan out concurrently, but a completion attempt walks its candidates
//! strictly one at a time: speculative parallel dispatch would contend for
//! the same GPU.

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use futures::future;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{OrchestratorConfig, ProviderDescriptor};
use crate::core::context::{ContextWindowManager, SAFETY_MARGIN_TOKENS};
use crate::core::error::{LlmError, Result};
use crate::core::providers::Provider;
use crate::core::streaming::TokenStream;
use crate::core::types::{ChatRequest, ChatResponse, ProviderHealth};

/// Record of one failed failover candidate, kept so exhaustion can name
/// every attempt and chain the last cause.
#[derive(Debug)]
struct CandidateAttempt {
    provider: String,
    error: LlmError,
}

/// Registry and failover engine over the configured providers.
pub struct ClientManager {
    providers: DashMap<String, Arc<Provider>>,
    fallback_order: RwLock<Vec<String>>,
    primary_id: ArcSwapOption<String>,
    context: ContextWindowManager,
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientManager {
    /// Create an empty manager; providers are registered afterwards.
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
            fallback_order: RwLock::new(Vec::new()),
            primary_id: ArcSwapOption::empty(),
            context: ContextWindowManager::new(),
        }
    }

    /// Build a manager from validated configuration: every descriptor is
    /// registered in declaration order, the configured primary (or the first
    /// descriptor) becomes primary, and an explicit fallback chain replaces
    /// the default declaration order.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let manager = Self::new();
        for descriptor in &config.providers {
            let is_primary = config.primary.as_deref() == Some(descriptor.id.as_str());
            manager.register(Provider::from_descriptor(descriptor.clone())?, is_primary);
        }
        if !config.fallback_chain.is_empty() {
            *manager.fallback_order.write() = config.fallback_chain.clone();
        }
        Ok(manager)
    }

    /// Register a provider. The first registration becomes primary
    /// implicitly; `is_primary` reassigns explicitly.
    pub fn register(&self, provider: Provider, is_primary: bool) {
        let id = provider.id().to_string();
        self.providers.insert(id.clone(), Arc::new(provider));
        {
            let mut order = self.fallback_order.write();
            if !order.contains(&id) {
                order.push(id.clone());
            }
        }
        info!(provider = %id, "registered provider");
        if is_primary || self.primary_id.load().is_none() {
            self.primary_id.store(Some(Arc::new(id.clone())));
            info!(provider = %id, "primary provider set");
        }
    }

    /// Build and register a provider from its descriptor in one step.
    pub fn register_descriptor(
        &self,
        descriptor: ProviderDescriptor,
        is_primary: bool,
    ) -> Result<()> {
        let provider = Provider::from_descriptor(descriptor)?;
        self.register(provider, is_primary);
        Ok(())
    }

    /// Reassign the primary pointer. Fails when the id is not registered.
    pub fn set_primary(&self, id: &str) -> Result<()> {
        if !self.providers.contains_key(id) {
            return Err(LlmError::configuration(format!(
                "cannot set primary: provider '{id}' is not registered (available: {})",
                self.provider_ids().join(", ")
            )));
        }
        self.primary_id.store(Some(Arc::new(id.to_string())));
        info!(provider = %id, "primary provider set");
        Ok(())
    }

    /// Current primary id, if any provider has been registered.
    pub fn primary_id(&self) -> Option<String> {
        self.primary_id.load_full().map(|id| (*id).clone())
    }

    /// Ids of every registered provider.
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|e| e.key().clone()).collect()
    }

    /// Look up a provider by id.
    pub fn get(&self, id: &str) -> Result<Arc<Provider>> {
        self.providers
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                LlmError::configuration(format!(
                    "provider '{id}' is not registered (available: {})",
                    self.provider_ids().join(", ")
                ))
            })
    }

    /// Probe every registered provider concurrently. The map always contains
    /// an entry per provider, unreachable ones included, so a status surface
    /// can render even with no usable primary.
    pub async fn check_all_health(&self) -> HashMap<String, ProviderHealth> {
        let providers: Vec<Arc<Provider>> = self
            .providers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let probes = providers.into_iter().map(|provider| async move {
            let health = provider.check_health().await;
            (provider.id().to_string(), health)
        });
        future::join_all(probes).await.into_iter().collect()
    }

    /// Completion against the primary/fallback chain.
    pub async fn complete_with_fallback(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.complete_routed(request, None).await
    }

    /// Completion with an optional router-preferred candidate tried first,
    /// then the primary, then the fallback chain.
    ///
    /// Candidates are walked in order: probe health, skip unreachable, fit
    /// the conversation to the candidate's context budget, dispatch. Any
    /// error or empty-content reply advances to the next candidate; the
    /// first non-empty success returns immediately. When everything fails,
    /// the error names every attempted id in order.
    pub async fn complete_routed(
        &self,
        request: &ChatRequest,
        preferred: Option<&str>,
    ) -> Result<ChatResponse> {
        request.validate()?;
        let mut attempts: Vec<CandidateAttempt> = Vec::new();

        for id in self.candidates(preferred) {
            let Ok(provider) = self.get(&id) else {
                warn!(provider = %id, "candidate is not registered, skipping");
                continue;
            };

            let health = provider.check_health().await;
            if !health.reachable {
                warn!(provider = %id, "candidate unreachable, skipping");
                attempts.push(CandidateAttempt {
                    provider: id,
                    error: LlmError::transport(provider.id(), "health probe found it unreachable"),
                });
                continue;
            }

            let attempt_request = self.fit_request(&provider, request)?;
            debug!(provider = %id, "dispatching completion");
            match provider.complete(&attempt_request).await {
                Ok(response) if !response.content.is_empty() => {
                    debug!(
                        provider = %id,
                        tokens = response.usage.total_tokens,
                        "completion succeeded"
                    );
                    return Ok(response);
                }
                Ok(_) => {
                    warn!(provider = %id, "empty completion, trying next candidate");
                    attempts.push(CandidateAttempt {
                        provider: id.clone(),
                        error: LlmError::protocol(&id, "provider returned empty content"),
                    });
                }
                Err(error @ LlmError::Cancelled { .. }) => return Err(error),
                Err(error) => {
                    warn!(provider = %id, %error, "completion failed, trying next candidate");
                    attempts.push(CandidateAttempt { provider: id, error });
                }
            }
        }

        Err(Self::exhaustion(attempts))
    }

    /// Open a token stream from the first candidate that passes its health
    /// probe. Failover happens before the first byte only; once the stream
    /// is handed out, errors surface through its error channel.
    pub async fn complete_streaming(&self, request: &ChatRequest) -> Result<TokenStream> {
        request.validate()?;
        let mut attempts: Vec<CandidateAttempt> = Vec::new();

        for id in self.candidates(None) {
            let Ok(provider) = self.get(&id) else {
                warn!(provider = %id, "candidate is not registered, skipping");
                continue;
            };

            let health = provider.check_health().await;
            if !health.reachable {
                warn!(provider = %id, "candidate unreachable, skipping");
                attempts.push(CandidateAttempt {
                    provider: id,
                    error: LlmError::transport(provider.id(), "health probe found it unreachable"),
                });
                continue;
            }

            let attempt_request = self.fit_request(&provider, request)?;
            match provider.complete_streaming(&attempt_request).await {
                Ok(stream) => {
                    debug!(provider = %id, "stream opened");
                    return Ok(stream);
                }
                Err(error @ LlmError::Cancelled { .. }) => return Err(error),
                Err(error) => {
                    warn!(provider = %id, %error, "stream open failed, trying next candidate");
                    attempts.push(CandidateAttempt { provider: id, error });
                }
            }
        }

        Err(Self::exhaustion(attempts))
    }

    /// Ordered candidate ids: preferred, then primary, then the fallback
    /// chain, de-duplicated in that precedence.
    fn candidates(&self, preferred: Option<&str>) -> Vec<String> {
        let mut ordered: Vec<String> = Vec::new();
        let mut push = |id: String, ordered: &mut Vec<String>| {
            if !ordered.contains(&id) {
                ordered.push(id);
            }
        };

        if let Some(id) = preferred {
            push(id.to_string(), &mut ordered);
        }
        if let Some(primary) = self.primary_id() {
            push(primary, &mut ordered);
        }
        for id in self.fallback_order.read().iter() {
            push(id.clone(), &mut ordered);
        }
        ordered
    }

    /// Trim the conversation to the candidate's context budget. Fitting a
    /// non-empty request down to nothing means no truncation can save it:
    /// that is a capacity problem of the request, not a backend outage, so
    /// it surfaces immediately instead of advancing the failover loop.
    fn fit_request(&self, provider: &Provider, request: &ChatRequest) -> Result<ChatRequest> {
        let window = provider.effective_context_window();
        let fitted =
            self.context
                .fit_messages(&request.messages, window, request.max_output_tokens);
        if fitted.is_empty() {
            let required = self.context.estimator().estimate_messages(&request.messages);
            let available = window
                .saturating_sub(request.max_output_tokens)
                .saturating_sub(SAFETY_MARGIN_TOKENS);
            return Err(LlmError::capacity(required, available));
        }
        if fitted.len() < request.messages.len() {
            info!(
                provider = %provider.id(),
                kept = fitted.len(),
                dropped = request.messages.len() - fitted.len(),
                "truncated conversation to fit context window"
            );
        }
        let mut attempt = request.clone();
        attempt.messages = fitted;
        Ok(attempt)
    }

    fn exhaustion(attempts: Vec<CandidateAttempt>) -> LlmError {
        if attempts.is_empty() {
            return LlmError::configuration(
                "no providers are registered for fallback completion",
            );
        }
        let attempted: Vec<String> = attempts.iter().map(|a| a.provider.clone()).collect();
        let last_cause = attempts.into_iter().next_back().map(|a| a.error);
        LlmError::exhausted(attempted, last_cause)
    }

    /// The context manager used for budget trimming.
    pub fn context(&self) -> &ContextWindowManager {
        &self.context
    }
}
