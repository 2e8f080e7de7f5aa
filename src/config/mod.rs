//! Configuration surface for the orchestration core.
//!
//! The descriptor list, fallback chain, primary id, and routing rules are
//! owned by the consuming application; this module only deserializes and
//! validates them. YAML is the on-disk format.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

use crate::core::error::{LlmError, Result};
use crate::core::providers::BackendKind;
use crate::core::types::RoutingRule;

/// Default inference timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default health-probe timeout in seconds.
const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 10;

/// Hard ceiling on health-probe timeouts.
const MAX_HEALTH_TIMEOUT_SECS: u64 = 15;

/// Static configuration of one inference backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique provider id
    pub id: String,
    /// Wire-protocol family
    pub backend: BackendKind,
    /// Host name, ignored when `base_url` is set
    #[serde(default = "default_host")]
    pub host: String,
    /// Port, ignored when `base_url` is set
    #[serde(default)]
    pub port: u16,
    /// Full base-URL override (scheme included)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Default model served by this provider
    pub model: String,
    /// Name of the environment variable holding the bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Inference timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Health-probe timeout in seconds, at most 15
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
    /// Context-window override in tokens
    #[serde(default)]
    pub context_window: Option<u32>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_health_timeout_secs() -> u64 {
    DEFAULT_HEALTH_TIMEOUT_SECS
}

impl ProviderDescriptor {
    /// Create a descriptor with defaults; point it somewhere with
    /// [`with_base_url`](Self::with_base_url) or host/port.
    pub fn new(id: impl Into<String>, backend: BackendKind, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backend,
            host: default_host(),
            port: 0,
            base_url: None,
            model: model.into(),
            api_key_env: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            health_timeout_secs: DEFAULT_HEALTH_TIMEOUT_SECS,
            context_window: None,
        }
    }

    /// Set a full base-URL override.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set host and port.
    pub fn with_host_port(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set the bearer-token environment-variable reference.
    pub fn with_api_key_env(mut self, name: impl Into<String>) -> Self {
        self.api_key_env = Some(name.into());
        self
    }

    /// Set the inference timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the context-window override.
    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = Some(tokens);
        self
    }

    /// The provider's base endpoint: the `base_url` override when present,
    /// otherwise `http://host:port`. Trailing slashes are stripped so
    /// adapters can append paths.
    pub fn endpoint(&self) -> Result<String> {
        let raw = match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        };
        Url::parse(&raw).map_err(|e| {
            LlmError::configuration(format!(
                "provider '{}' has an invalid endpoint '{}': {e}",
                self.id, raw
            ))
        })?;
        Ok(raw)
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(LlmError::configuration("provider id must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(LlmError::configuration(format!(
                "provider '{}' has no default model",
                self.id
            )));
        }
        if self.base_url.is_none() && self.port == 0 {
            return Err(LlmError::configuration(format!(
                "provider '{}' needs either a port or a base_url",
                self.id
            )));
        }
        if self.timeout_secs == 0 {
            return Err(LlmError::configuration(format!(
                "provider '{}' has a zero inference timeout",
                self.id
            )));
        }
        if self.health_timeout_secs == 0 || self.health_timeout_secs > MAX_HEALTH_TIMEOUT_SECS {
            return Err(LlmError::configuration(format!(
                "provider '{}' health timeout must be within 1..={MAX_HEALTH_TIMEOUT_SECS}s",
                self.id
            )));
        }
        self.endpoint().map(|_| ())
    }
}

/// Top-level configuration consumed by the client manager and router.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Backend descriptors
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
    /// Primary provider id; defaults to the first descriptor when unset
    #[serde(default)]
    pub primary: Option<String>,
    /// Ordered fallback chain; defaults to declaration order when empty
    #[serde(default)]
    pub fallback_chain: Vec<String>,
    /// Ordered routing rules
    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,
}

impl OrchestratorConfig {
    /// Load and validate a YAML configuration file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading orchestrator configuration");
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            LlmError::configuration(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML configuration text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| LlmError::configuration(format!("failed to parse config: {e}")))?;
        config.validate()?;
        debug!(
            providers = config.providers.len(),
            rules = config.routing_rules.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Validate ids, endpoints, timeouts, and the primary reference.
    /// Fallback-chain entries naming unknown providers are a runtime warning
    /// rather than an error, so a chain can be shared across deployments
    /// where not every backend exists.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for descriptor in &self.providers {
            descriptor.validate()?;
            if !seen.insert(descriptor.id.as_str()) {
                return Err(LlmError::configuration(format!(
                    "duplicate provider id '{}'",
                    descriptor.id
                )));
            }
        }

        if let Some(primary) = &self.primary {
            if !seen.contains(primary.as_str()) {
                return Err(LlmError::configuration(format!(
                    "primary provider '{primary}' is not declared"
                )));
            }
        }

        for rule in &self.routing_rules {
            if rule.condition.trim().is_empty() || rule.provider.trim().is_empty() {
                return Err(LlmError::configuration(
                    "routing rules need a condition and a target provider",
                ));
            }
        }
        Ok(())
    }
}
