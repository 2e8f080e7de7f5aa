//! Rule-based request routing.
//!
//! Rules are evaluated in declared order against the request's prompt kind
//! and complexity label; the first match whose target provider is registered
//! wins, and no match falls back to the current primary. Conditions are
//! single comparisons of the form `subject op 'value'`.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::core::error::{LlmError, Result};
use crate::core::manager::ClientManager;
use crate::core::types::{PromptKind, RoutingRule};

/// Ordered complexity scale used by ordinal comparisons.
pub const COMPLEXITY_SCALE: [&str; 5] = ["trivial", "low", "medium", "high", "critical"];

/// Grammar of a rule condition: `prompt_type == 'explain'`,
/// `task_complexity >= 'high'`, and the other comparison operators.
static CONDITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(prompt_type|task_complexity)\s*(==|!=|>=|<=|>|<)\s*'([^']*)'\s*$")
        .expect("condition grammar regex")
});

/// Evaluates routing rules to pick a preferred provider before failover.
#[derive(Debug, Clone, Default)]
pub struct RequestRouter {
    rules: Vec<RoutingRule>,
}

impl RequestRouter {
    /// Create a router over an ordered rule list.
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    /// The configured rules, in evaluation order.
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Resolve the provider id for a request. Rules are tried in order; a
    /// matching rule whose target is unregistered is skipped with a warning.
    /// With no match the current primary id is returned; a missing primary
    /// is a configuration error.
    pub fn resolve(
        &self,
        manager: &ClientManager,
        kind: PromptKind,
        complexity: &str,
    ) -> Result<String> {
        let registered = manager.provider_ids();

        for rule in &self.rules {
            if !evaluate_condition(&rule.condition, kind, complexity) {
                continue;
            }
            if registered.iter().any(|id| id == &rule.provider) {
                debug!(
                    condition = %rule.condition,
                    provider = %rule.provider,
                    rationale = %rule.rationale,
                    "routing rule matched"
                );
                return Ok(rule.provider.clone());
            }
            warn!(
                condition = %rule.condition,
                provider = %rule.provider,
                "routing rule matched but its provider is not registered, skipping"
            );
        }

        match manager.primary_id() {
            Some(primary) => {
                debug!(
                    kind = %kind,
                    complexity,
                    provider = %primary,
                    "no routing rule matched, using primary"
                );
                Ok(primary)
            }
            None => Err(LlmError::configuration(
                "no routing rule matched and no primary provider is set",
            )),
        }
    }
}

/// Evaluate one condition. Anything outside the grammar never matches —
/// routing fails open to the primary rather than crashing on a config typo.
fn evaluate_condition(condition: &str, kind: PromptKind, complexity: &str) -> bool {
    let Some(captures) = CONDITION_RE.captures(condition) else {
        return false;
    };
    let subject = captures[1].to_ascii_lowercase();
    let operator = captures.get(2).map(|m| m.as_str()).unwrap_or("");
    let value = captures.get(3).map(|m| m.as_str()).unwrap_or("");

    match subject.as_str() {
        "prompt_type" => {
            let equal = kind.as_str().eq_ignore_ascii_case(value.trim());
            match operator {
                "==" => equal,
                "!=" => !equal,
                // Ordinal comparisons make no sense for prompt kinds.
                _ => false,
            }
        }
        "task_complexity" => {
            let actual = complexity_rank(complexity);
            let target = complexity_rank(value);
            match operator {
                ">=" => actual >= target,
                "<=" => actual <= target,
                ">" => actual > target,
                "<" => actual < target,
                "==" => actual == target,
                "!=" => actual != target,
                _ => false,
            }
        }
        _ => false,
    }
}

/// Rank of a complexity label on the ordered scale. Unrecognized labels rank
/// lowest by design: a typo degrades routing, it must never break inference.
pub fn complexity_rank(label: &str) -> usize {
    COMPLEXITY_SCALE
        .iter()
        .position(|level| level.eq_ignore_ascii_case(label.trim()))
        .unwrap_or(0)
}
