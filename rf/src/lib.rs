//! ReportFlow - spreadsheet-to-report pipeline driven by LLM calls
//!
//! A run has two phases. First every configured sheet is handed to a model
//! together with a key schema, and the validated answers are merged into one
//! fact mapping. Then every configured paragraph is written by a model from
//! the facts it names. Tasks inside a phase run concurrently; a failed task
//! is recorded and never stops the rest.
//!
//! # Modules
//!
//! - [`config`] - Project files, validation at load time
//! - [`domain`] - Facts, key schemas, task declarations and sheet data
//! - [`llm`] - Provider registry, client trait and OpenAI-compatible adapter
//! - [`prompts`] - Handlebars prompt templates
//! - [`agent`] - Extraction and generation agents
//! - [`orchestrator`] - The two-phase run and its report
//! - [`assembler`] - Filling a report template with paragraphs
//! - [`cli`] - Command-line interface

pub mod agent;
pub mod assembler;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod prompts;

pub use config::{ConfigError, ProjectConfig};
pub use error::TaskError;
pub use orchestrator::{Orchestrator, Phase, RunReport, RunSettings};
