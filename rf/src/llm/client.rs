//! LlmClient trait definition

use async_trait::async_trait;

use super::{CompletionRequest, LlmError, ResolvedProvider};

/// Stateless model client: one prompt in, one text out
///
/// Every call is independent and carries its own provider settings, so a
/// single client instance serves all providers of a run.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one completion request and return the response text
    ///
    /// When the request carries a tool, the text is the tool-call argument
    /// JSON rather than free prose.
    async fn complete(&self, provider: &ResolvedProvider, request: &CompletionRequest) -> Result<String, LlmError>;
}
