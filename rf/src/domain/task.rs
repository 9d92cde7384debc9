//! Validated task declarations
//!
//! These are produced once by the config loader and are immutable for the run.

use std::path::PathBuf;

use indexmap::IndexMap;

use super::facts::KeySchema;

/// One per-sheet extraction task
#[derive(Debug, Clone)]
pub struct SheetTask {
    /// Sheet name in the workbook
    pub sheet_name: String,
    /// Prompt template path, as declared (also the registered template name)
    pub prompt_template: PathBuf,
    /// Declared key -> kind schema (never empty)
    pub key_schema: KeySchema,
    /// Declared provider name (before any process-wide override)
    pub provider_name: String,
}

/// One per-paragraph generation task
#[derive(Debug, Clone)]
pub struct ParagraphTask {
    /// Paragraph id, also the default document token
    pub placeholder_name: String,
    /// Ordered, duplicate-free input keys (`Key` or `Sheet.Key`)
    pub input_keys: Vec<String>,
    /// Prompt template path, as declared
    pub prompt_template: PathBuf,
    /// Declared provider name (before any process-wide override)
    pub provider_name: String,
}

/// Both task layers plus the paragraph -> document token aliases
#[derive(Debug, Clone, Default)]
pub struct TaskConfig {
    pub sheets: Vec<SheetTask>,
    pub paragraphs: Vec<ParagraphTask>,
    pub placeholders: IndexMap<String, String>,
}

impl TaskConfig {
    /// Whether some sheet task declares `key`
    ///
    /// Accepts plain keys and `Sheet.Key`; a plain key that exists verbatim
    /// wins over the qualified reading.
    pub fn produces(&self, key: &str) -> bool {
        if self.sheets.iter().any(|s| s.key_schema.contains(key)) {
            return true;
        }
        match key.split_once('.') {
            Some((sheet, field)) => self
                .sheets
                .iter()
                .any(|s| s.sheet_name == sheet && s.key_schema.contains(field)),
            None => false,
        }
    }

    /// Document token for a paragraph (alias, or the paragraph id itself)
    pub fn token_for<'a>(&'a self, paragraph: &'a str) -> &'a str {
        self.placeholders
            .get(paragraph)
            .map(String::as_str)
            .unwrap_or(paragraph)
    }

    pub fn sheet(&self, name: &str) -> Option<&SheetTask> {
        self.sheets.iter().find(|s| s.sheet_name == name)
    }

    pub fn paragraph(&self, name: &str) -> Option<&ParagraphTask> {
        self.paragraphs.iter().find(|p| p.placeholder_name == name)
    }

    /// All prompt template paths, sheets first, without duplicates
    pub fn prompt_templates(&self) -> Vec<&PathBuf> {
        let mut out: Vec<&PathBuf> = Vec::new();
        let all = self
            .sheets
            .iter()
            .map(|s| &s.prompt_template)
            .chain(self.paragraphs.iter().map(|p| &p.prompt_template));
        for path in all {
            if !out.contains(&path) {
                out.push(path);
            }
        }
        out
    }
}
