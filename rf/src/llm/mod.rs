//! Model access: provider registry, client trait and the OpenAI-compatible adapter

pub mod client;
mod error;
mod openai;
mod registry;
mod types;

pub use client::LlmClient;
pub use error::LlmError;
pub use openai::OpenAIClient;
pub use registry::{CredentialStatus, ProviderRegistry, ResolvedProvider};
pub use types::{CompletionRequest, ToolDefinition};
