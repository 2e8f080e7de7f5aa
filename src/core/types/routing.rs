//! Prompt classification and routing rule types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of code-generation or analysis prompt being issued.
///
/// Routing rules compare against the snake_case name of the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Generate an API endpoint
    GenerateEndpoint,
    /// Generate a domain model or entity
    GenerateModel,
    /// Generate a service with interface
    GenerateService,
    /// Generate unit or integration tests
    GenerateTest,
    /// Generate a UI component
    GenerateComponent,
    /// Generate a database migration
    GenerateMigration,
    /// Refactor existing code
    Refactor,
    /// Explain a code segment
    Explain,
    /// Review code for issues
    Review,
    /// Fix a compilation or runtime error
    FixCompilationError,
}

impl PromptKind {
    /// Name used in routing-rule conditions.
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::GenerateEndpoint => "generate_endpoint",
            PromptKind::GenerateModel => "generate_model",
            PromptKind::GenerateService => "generate_service",
            PromptKind::GenerateTest => "generate_test",
            PromptKind::GenerateComponent => "generate_component",
            PromptKind::GenerateMigration => "generate_migration",
            PromptKind::Refactor => "refactor",
            PromptKind::Explain => "explain",
            PromptKind::Review => "review",
            PromptKind::FixCompilationError => "fix_compilation_error",
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declarative routing rule.
///
/// Rules are evaluated in declared order; the first match whose target
/// provider is registered wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Condition expression, e.g. `task_complexity >= 'high'`
    pub condition: String,
    /// Target provider id
    pub provider: String,
    /// Human-readable explanation for the rule
    #[serde(default)]
    pub rationale: String,
}

impl RoutingRule {
    /// Create a rule.
    pub fn new(
        condition: impl Into<String>,
        provider: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            condition: condition.into(),
            provider: provider.into(),
            rationale: rationale.into(),
        }
    }
}
