//! LLM request types
//!
//! A request is a single rendered prompt, sent as the only user message,
//! optionally paired with one function tool the model is forced to call.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything needed for one chat-completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Rendered prompt, sent as the sole user message
    pub prompt: String,

    /// Function the model must call; its arguments become the response text
    pub tool: Option<ToolDefinition>,
}

impl CompletionRequest {
    /// Plain-text completion
    pub fn text(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        debug!(prompt_len = prompt.len(), "CompletionRequest::text: called");
        Self { prompt, tool: None }
    }

    /// Completion that forces a call to `tool`
    pub fn with_tool(prompt: impl Into<String>, tool: ToolDefinition) -> Self {
        let prompt = prompt.into();
        debug!(prompt_len = prompt.len(), tool = %tool.name, "CompletionRequest::with_tool: called");
        Self {
            prompt,
            tool: Some(tool),
        }
    }

    /// Name of the forced tool, if any
    pub fn tool_name(&self) -> Option<&str> {
        self.tool.as_ref().map(|t| t.name.as_str())
    }
}

/// Function tool definition (JSON-schema parameters)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: serde_json::Value) -> Self {
        let name = name.into();
        let description = description.into();
        debug!(%name, "ToolDefinition::new: called");
        Self {
            name,
            description,
            parameters,
        }
    }

    /// Convert to OpenAI `tools[]` entry format
    pub fn to_openai_schema(&self) -> serde_json::Value {
        debug!(%self.name, "ToolDefinition::to_openai_schema: called");
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }

    /// `tool_choice` value forcing this function
    pub fn to_openai_choice(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": { "name": self.name }
        })
    }
}
