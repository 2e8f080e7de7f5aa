//! Context-budget management: heuristic token estimation and message-list
//! truncation.
//!
//! The estimator is a fast character-ratio heuristic (4 chars per token, the
//! common approximation for GPT-class tokenizers), good enough for budget
//! checks without pulling in a tokenizer.

use tracing::{debug, warn};

use crate::core::types::{ChatMessage, ChatRole};

/// Average characters per token used by the heuristic.
const CHARS_PER_TOKEN: u32 = 4;

/// Per-message overhead for role tags and separators in the model's message
/// encoding.
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Cost of priming the model's reply (`<|start|>assistant<|sep|>`).
const REPLY_PRIMING_TOKENS: u32 = 3;

/// Tokens withheld from every budget to absorb estimation error.
pub const SAFETY_MARGIN_TOKENS: u32 = 256;

/// Heuristic token-count estimator for text and message lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenEstimator;

impl TokenEstimator {
    /// Estimate tokens for a plain string: `ceil(chars / 4)`, minimum 1 for
    /// non-empty input, 0 for empty.
    pub fn estimate(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        let chars = text.chars().count() as u32;
        chars.div_ceil(CHARS_PER_TOKEN).max(1)
    }

    /// Estimate the total cost of a message list: per-message overhead plus
    /// role and content estimates, plus reply priming for a non-empty
    /// conversation.
    pub fn estimate_messages(&self, messages: &[ChatMessage]) -> u32 {
        let mut total = 0;
        for message in messages {
            total += MESSAGE_OVERHEAD_TOKENS;
            total += self.estimate(message.role.as_str());
            total += self.estimate(&message.content);
        }
        if !messages.is_empty() {
            total += REPLY_PRIMING_TOKENS;
        }
        total
    }
}

/// Trims conversations to a model's context budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextWindowManager {
    estimator: TokenEstimator,
}

impl ContextWindowManager {
    /// Create a manager with the default estimator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying estimator.
    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Fit `messages` into `context_window` while reserving
    /// `reserved_output_tokens` for generation.
    ///
    /// A leading system message is kept whenever it alone fits the budget.
    /// The remaining messages are scanned newest to oldest and accepted while
    /// the running total stays within budget; the first rejection drops
    /// everything older. Accepted messages come back in chronological order,
    /// and the result's total cost never exceeds the budget. An exhausted
    /// budget yields an empty list.
    pub fn fit_messages(
        &self,
        messages: &[ChatMessage],
        context_window: u32,
        reserved_output_tokens: u32,
    ) -> Vec<ChatMessage> {
        let budget = context_window
            .saturating_sub(reserved_output_tokens)
            .saturating_sub(SAFETY_MARGIN_TOKENS);
        if budget == 0 {
            warn!(
                context_window,
                reserved_output_tokens,
                margin = SAFETY_MARGIN_TOKENS,
                "context budget exhausted before any message"
            );
            return Vec::new();
        }

        let mut result = Vec::new();
        let mut used_tokens = 0;

        let has_leading_system = messages
            .first()
            .is_some_and(|m| m.role == ChatRole::System);
        if has_leading_system {
            let system = &messages[0];
            let system_tokens = self.message_cost(system);
            if system_tokens <= budget {
                result.push(system.clone());
                used_tokens += system_tokens;
            }
        }

        let rest = if has_leading_system {
            &messages[1..]
        } else {
            messages
        };

        let mut kept = Vec::new();
        let mut dropped = 0;
        for message in rest.iter().rev() {
            let message_tokens = self.message_cost(message);
            if used_tokens + message_tokens <= budget {
                kept.push(message.clone());
                used_tokens += message_tokens;
            } else {
                dropped = rest.len() - kept.len();
                break;
            }
        }
        if dropped > 0 {
            debug!(dropped, "dropped older messages to fit context window");
        }

        kept.reverse();
        result.extend(kept);
        debug!(
            kept = result.len(),
            used_tokens, budget, "fitted conversation to context budget"
        );
        result
    }

    /// Tokens left for generation after the prompt and safety margin,
    /// floored at zero.
    pub fn available_output_tokens(&self, messages: &[ChatMessage], context_window: u32) -> u32 {
        let prompt_tokens: u32 = messages.iter().map(|m| self.message_cost(m)).sum();
        context_window
            .saturating_sub(prompt_tokens)
            .saturating_sub(SAFETY_MARGIN_TOKENS)
    }

    fn message_cost(&self, message: &ChatMessage) -> u32 {
        self.estimator.estimate(&message.content) + MESSAGE_OVERHEAD_TOKENS
    }
}
