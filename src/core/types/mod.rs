//! Canonical data model shared across adapters, manager, and router.

pub mod health;
pub mod message;
pub mod model;
pub mod request;
pub mod response;
pub mod routing;

pub use health::ProviderHealth;
pub use message::{ChatMessage, ChatRole};
pub use model::{ModelDescriptor, parse_parameter_size};
pub use request::{ChatRequest, ResponseFormat};
pub use response::{ChatResponse, TokenChunk, Usage};
pub use routing::{PromptKind, RoutingRule};
