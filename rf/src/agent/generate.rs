//! Generation agent: selected facts in, one paragraph out

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::{Fact, FactMapping, ParagraphTask};
use crate::error::TaskError;
use crate::llm::{CompletionRequest, LlmClient, ResolvedProvider};
use crate::prompts::PromptLoader;

/// Pick a paragraph's input facts, in input-key order
///
/// Every absent key is reported in a single `MissingFact`.
pub fn select_facts(task: &ParagraphTask, facts: &FactMapping) -> Result<IndexMap<String, Fact>, TaskError> {
    debug!(paragraph = %task.placeholder_name, keys = task.input_keys.len(), "select_facts: called");
    let mut selected = IndexMap::with_capacity(task.input_keys.len());
    let mut missing = Vec::new();
    for key in &task.input_keys {
        match facts.lookup(key) {
            Some(fact) => {
                selected.insert(key.clone(), fact);
            }
            None => missing.push(key.clone()),
        }
    }
    if !missing.is_empty() {
        debug!(paragraph = %task.placeholder_name, ?missing, "select_facts: facts missing");
        return Err(TaskError::MissingFact { keys: missing });
    }
    Ok(selected)
}

/// Template variables: each fact at top level, plus `facts`, `data` and `placeholder`
fn build_context(task: &ParagraphTask, selected: &IndexMap<String, Fact>) -> Value {
    let mut root = Map::new();
    let mut facts = Map::new();
    let mut data: Map<String, Value> = Map::new();

    for (key, fact) in selected {
        let value = fact.value.to_json();
        root.insert(key.clone(), value.clone());
        facts.insert(key.clone(), value.clone());

        let field = key
            .split_once('.')
            .filter(|(sheet, _)| *sheet == fact.sheet)
            .map(|(_, field)| field)
            .unwrap_or(key);
        if let Value::Object(sheet) = data
            .entry(fact.sheet.clone())
            .or_insert_with(|| Value::Object(Map::new()))
        {
            sheet.insert(field.to_string(), value);
        }
    }

    root.insert("facts".to_string(), Value::Object(facts));
    root.insert("data".to_string(), Value::Object(data));
    root.insert("placeholder".to_string(), Value::String(task.placeholder_name.clone()));
    Value::Object(root)
}

/// Generate one paragraph from already-selected facts
///
/// The model's text is returned unmodified.
pub async fn generate(
    llm: &dyn LlmClient,
    prompts: &PromptLoader,
    provider: &ResolvedProvider,
    task: &ParagraphTask,
    selected: &IndexMap<String, Fact>,
) -> Result<String, TaskError> {
    debug!(paragraph = %task.placeholder_name, provider = %provider.name, "generate: called");
    let context = build_context(task, selected);
    let prompt = prompts.render(&task.prompt_template, &context)?;
    let text = llm.complete(provider, &CompletionRequest::text(prompt)).await?;
    info!(paragraph = %task.placeholder_name, chars = text.len(), "Generated paragraph");
    Ok(text)
}
