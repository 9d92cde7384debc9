//! Prompt Loader
//!
//! Reads every prompt template a project declares once at startup and
//! renders them on demand.

use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ConfigError;
use crate::domain::TaskConfig;
use crate::error::TaskError;

/// Compiled prompt templates, keyed by their declared path
pub struct PromptLoader {
    /// Handlebars template engine
    hbs: Handlebars<'static>,
    /// Directory declared paths are resolved against
    base_dir: PathBuf,
}

impl PromptLoader {
    /// Create an empty loader resolving paths against `base_dir`
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        debug!(?base_dir, "PromptLoader::new: called");
        let mut hbs = Handlebars::new();
        // Prompts are plain text, not HTML
        hbs.register_escape_fn(handlebars::no_escape);
        hbs.set_strict_mode(false);
        Self { hbs, base_dir }
    }

    /// Load and compile every template referenced by `tasks`
    pub fn for_tasks(base_dir: impl AsRef<Path>, tasks: &TaskConfig) -> Result<Self, ConfigError> {
        let mut loader = Self::new(base_dir);
        for path in tasks.prompt_templates() {
            loader.register_file(path)?;
        }
        info!(
            templates = loader.len(),
            base_dir = %loader.base_dir.display(),
            "Loaded prompt templates"
        );
        Ok(loader)
    }

    /// Read and compile one template file under its declared name
    pub fn register_file(&mut self, declared: &Path) -> Result<(), ConfigError> {
        let name = template_name(declared);
        if self.hbs.has_template(&name) {
            return Ok(());
        }
        let path = if declared.is_absolute() {
            declared.to_path_buf()
        } else {
            self.base_dir.join(declared)
        };
        debug!(%name, ?path, "PromptLoader::register_file: called");

        let source = std::fs::read_to_string(&path).map_err(|e| ConfigError::Template {
            path: path.clone(),
            message: e.to_string(),
        })?;
        self.hbs
            .register_template_string(&name, source)
            .map_err(|e| ConfigError::Template {
                path,
                message: e.to_string(),
            })
    }

    /// Compile a template from a string
    pub fn register_inline(&mut self, name: impl AsRef<Path>, source: &str) -> Result<(), ConfigError> {
        let name = template_name(name.as_ref());
        debug!(%name, "PromptLoader::register_inline: called");
        self.hbs
            .register_template_string(&name, source)
            .map_err(|e| ConfigError::Template {
                path: PathBuf::from(&name),
                message: e.to_string(),
            })
    }

    /// Render a registered template
    pub fn render<T: Serialize>(&self, declared: &Path, context: &T) -> Result<String, TaskError> {
        let name = template_name(declared);
        debug!(%name, "PromptLoader::render: called");
        if !self.hbs.has_template(&name) {
            return Err(TaskError::Template(format!("template '{}' is not loaded", name)));
        }
        self.hbs
            .render(&name, context)
            .map_err(|e| TaskError::Template(format!("failed to render '{}': {}", name, e)))
    }

    pub fn contains(&self, declared: &Path) -> bool {
        self.hbs.has_template(&template_name(declared))
    }

    pub fn len(&self) -> usize {
        self.hbs.get_templates().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn template_name(declared: &Path) -> String {
    declared.to_string_lossy().into_owned()
}
