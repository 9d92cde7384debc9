//! Prompt Template System
//!
//! Prompt files use Handlebars syntax. Paths are declared per task and
//! resolved against the project's prompt directory.

mod loader;

pub use loader::PromptLoader;
