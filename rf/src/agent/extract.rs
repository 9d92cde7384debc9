//! Extraction agent: one sheet in, declared facts out

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::{FactValue, SheetTable, SheetTask};
use crate::error::TaskError;
use crate::llm::{CompletionRequest, LlmClient, ResolvedProvider, ToolDefinition};
use crate::prompts::PromptLoader;

/// Name of the function the model is forced to call
pub const EXTRACT_TOOL: &str = "extract";

#[derive(Debug, Serialize)]
struct SchemaEntry<'a> {
    key: &'a str,
    kind: &'static str,
}

/// Template variables for an extraction prompt
#[derive(Debug, Serialize)]
struct ExtractContext<'a> {
    sheet: &'a str,
    table: String,
    rows: &'a [Map<String, Value>],
    keys: Vec<&'a str>,
    schema: Vec<SchemaEntry<'a>>,
}

/// Extract the task's declared keys from one sheet
///
/// The result has exactly the declared keys, each coerced to its kind.
pub async fn extract(
    llm: &dyn LlmClient,
    prompts: &PromptLoader,
    provider: &ResolvedProvider,
    task: &SheetTask,
    sheet: &SheetTable,
) -> Result<IndexMap<String, FactValue>, TaskError> {
    debug!(sheet = %task.sheet_name, provider = %provider.name, "extract: called");

    let context = ExtractContext {
        sheet: sheet.name(),
        table: sheet.to_csv(),
        rows: sheet.rows(),
        keys: task.key_schema.keys().collect(),
        schema: task
            .key_schema
            .iter()
            .map(|(key, kind)| SchemaEntry { key, kind: kind.name() })
            .collect(),
    };
    let prompt = prompts.render(&task.prompt_template, &context)?;

    let tool = ToolDefinition::new(
        EXTRACT_TOOL,
        format!("Report the values found in sheet '{}'", task.sheet_name),
        task.key_schema.to_json_schema(),
    );
    let text = llm.complete(provider, &CompletionRequest::with_tool(prompt, tool)).await?;

    let object = parse_object(&text)?;
    let facts = task
        .key_schema
        .apply(&object)
        .map_err(|v| TaskError::SchemaValidation {
            key: v.key,
            reason: v.reason,
        })?;

    info!(sheet = %task.sheet_name, facts = facts.len(), "Extracted facts");
    Ok(facts)
}

/// Parse a model response as a JSON object, tolerating a Markdown code fence
fn parse_object(text: &str) -> Result<Map<String, Value>, TaskError> {
    let body = strip_code_fence(text.trim());
    let value: Value = serde_json::from_str(body).map_err(|e| {
        debug!(error = %e, "parse_object: not JSON");
        TaskError::MalformedResponse(format!("response is not valid JSON: {}", e))
    })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(TaskError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            short(&other.to_string())
        ))),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip the info string (e.g. "json") up to the first newline
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn short(text: &str) -> String {
    const LIMIT: usize = 80;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
