//! Project configuration types and loading
//!
//! A project is a directory of YAML files:
//!
//! ```text
//! configs/
//! ├── providers.yaml         # provider name -> model, endpoint, credential
//! ├── sheet_tasks.yaml       # sheet name -> prompt, key schema, provider
//! ├── paragraph_tasks.yaml   # paragraph id -> input keys, prompt, provider
//! ├── doc_placeholders.yaml  # optional: paragraph id -> document token
//! └── settings.yaml          # optional: run settings
//! ```
//!
//! Everything is validated here, before any task runs. A `ConfigError` is
//! fatal to the whole run.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{KeyKind, KeySchema, ParagraphTask, SheetTask, TaskConfig};

pub const PROVIDERS_FILE: &str = "providers.yaml";
pub const SHEET_TASKS_FILE: &str = "sheet_tasks.yaml";
pub const PARAGRAPH_TASKS_FILE: &str = "paragraph_tasks.yaml";
pub const PLACEHOLDERS_FILE: &str = "doc_placeholders.yaml";
pub const SETTINGS_FILE: &str = "settings.yaml";

/// Environment variable naming a provider that replaces every task's provider
pub const PROVIDER_OVERRIDE_ENV: &str = "LLM_PROVIDER";

/// Load-time configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse { path: PathBuf, source: serde_yaml::Error },

    #[error("Unknown provider '{name}' referenced by {referrer}")]
    UnknownProvider { name: String, referrer: String },

    #[error("Provider '{name}' is invalid: {reason}")]
    InvalidProvider { name: String, reason: String },

    #[error("Sheet task '{sheet}' declares no keys")]
    EmptySchema { sheet: String },

    #[error("Sheet task '{sheet}', key '{key}': {reason}")]
    InvalidKey { sheet: String, key: String, reason: String },

    #[error("Paragraph task '{paragraph}' lists input key '{key}' more than once")]
    DuplicateInputKey { paragraph: String, key: String },

    #[error("Paragraph task '{paragraph}' needs key '{key}', which no sheet task produces")]
    UnproducedKey { paragraph: String, key: String },

    #[error("Prompt template {}: {message}", path.display())]
    Template { path: PathBuf, message: String },
}

/// Run settings (`settings.yaml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Provider used by tasks that do not name one
    #[serde(rename = "default-provider")]
    pub default_provider: String,

    /// Maximum tasks in flight within one phase
    #[serde(rename = "max-concurrency")]
    pub max_concurrency: usize,

    /// Whole-run timeout; unfinished tasks are recorded as cancelled
    #[serde(rename = "run-timeout-secs")]
    pub run_timeout_secs: Option<u64>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Base directory for prompt paths, relative to the config directory
    #[serde(rename = "prompt-dir")]
    pub prompt_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_provider: "openai".to_string(),
            max_concurrency: 4,
            run_timeout_secs: None,
            log_level: None,
            prompt_dir: None,
        }
    }
}

/// One provider entry (`providers.yaml`)
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Model identifier sent with every request
    pub model: String,

    /// OpenAI-compatible endpoint root, including any version segment
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Literal credential; wins over `api-key-env`
    #[serde(rename = "api-key", default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the credential
    #[serde(rename = "api-key-env", default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens", default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms", default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Extra attempts for transient failures (capped by the client)
    #[serde(rename = "max-retries", default)]
    pub max_retries: u32,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_ms() -> u64 {
    120_000
}

impl ProviderSpec {
    /// Minimal entry, mainly for tests and programmatic setups
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.into(),
            api_key: None,
            api_key_env: None,
            max_tokens: default_max_tokens(),
            timeout_ms: default_timeout_ms(),
            temperature: None,
            max_retries: 0,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }
}

impl std::fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_ms", &self.timeout_ms)
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// One entry of `sheet_tasks.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetTaskSpec {
    pub prompt: PathBuf,
    /// key -> kind name (`number`, `string`, `array[string]`)
    pub keys: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// One entry of `paragraph_tasks.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParagraphTaskSpec {
    #[serde(default)]
    pub keys: Vec<String>,
    pub prompt: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Fully loaded and validated project
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    /// Directory the files were read from
    pub dir: PathBuf,
    pub settings: Settings,
    pub providers: IndexMap<String, ProviderSpec>,
    pub tasks: TaskConfig,
}

impl ProjectConfig {
    /// Load and validate every file in `dir`
    ///
    /// `provider_override` is the process-wide provider (if any); it must name
    /// a configured provider.
    pub fn load(dir: impl AsRef<Path>, provider_override: Option<&str>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        debug!(?dir, ?provider_override, "ProjectConfig::load: called");

        let settings: Settings = read_yaml(&dir.join(SETTINGS_FILE), false)?;
        let providers: IndexMap<String, ProviderSpec> = read_yaml(&dir.join(PROVIDERS_FILE), true)?;
        let sheets: IndexMap<String, SheetTaskSpec> = read_yaml(&dir.join(SHEET_TASKS_FILE), true)?;
        let paragraphs: IndexMap<String, ParagraphTaskSpec> = read_yaml(&dir.join(PARAGRAPH_TASKS_FILE), true)?;
        let placeholders: IndexMap<String, String> = read_yaml(&dir.join(PLACEHOLDERS_FILE), false)?;

        let config = Self::from_parts(
            dir,
            settings,
            providers,
            sheets,
            paragraphs,
            placeholders,
            provider_override,
        )?;
        info!(
            dir = %dir.display(),
            providers = config.providers.len(),
            sheets = config.tasks.sheets.len(),
            paragraphs = config.tasks.paragraphs.len(),
            "Loaded project config"
        );
        Ok(config)
    }

    /// Validate already-parsed files
    pub fn from_parts(
        dir: impl Into<PathBuf>,
        settings: Settings,
        providers: IndexMap<String, ProviderSpec>,
        sheets: IndexMap<String, SheetTaskSpec>,
        paragraphs: IndexMap<String, ParagraphTaskSpec>,
        placeholders: IndexMap<String, String>,
        provider_override: Option<&str>,
    ) -> Result<Self, ConfigError> {
        debug!(
            providers = providers.len(),
            sheets = sheets.len(),
            paragraphs = paragraphs.len(),
            "ProjectConfig::from_parts: called"
        );
        validate_providers(&providers)?;

        if let Some(name) = provider_override {
            if !providers.contains_key(name) {
                return Err(ConfigError::UnknownProvider {
                    name: name.to_string(),
                    referrer: "the provider override".to_string(),
                });
            }
            info!(provider = %name, "Provider override active for every task");
        }

        let check_provider = |name: &str, referrer: String| -> Result<(), ConfigError> {
            // Under an override the declared name is never resolved
            if provider_override.is_none() && !providers.contains_key(name) {
                return Err(ConfigError::UnknownProvider {
                    name: name.to_string(),
                    referrer,
                });
            }
            Ok(())
        };

        let mut tasks = TaskConfig::default();

        for (sheet_name, spec) in sheets {
            let provider_name = spec
                .provider
                .clone()
                .unwrap_or_else(|| settings.default_provider.clone());
            check_provider(&provider_name, format!("sheet task '{}'", sheet_name))?;

            if spec.keys.is_empty() {
                return Err(ConfigError::EmptySchema { sheet: sheet_name });
            }
            let mut schema = IndexMap::with_capacity(spec.keys.len());
            for (key, kind) in &spec.keys {
                if key.trim().is_empty() {
                    return Err(ConfigError::InvalidKey {
                        sheet: sheet_name.clone(),
                        key: key.clone(),
                        reason: "key name is empty".to_string(),
                    });
                }
                let kind: KeyKind = kind.parse().map_err(|reason| ConfigError::InvalidKey {
                    sheet: sheet_name.clone(),
                    key: key.clone(),
                    reason,
                })?;
                schema.insert(key.clone(), kind);
            }

            for key in schema.keys() {
                if let Some(other) = tasks.sheets.iter().find(|s| s.key_schema.contains(key)) {
                    warn!(
                        %key,
                        first = %other.sheet_name,
                        second = %sheet_name,
                        "Key declared by two sheets; the later sheet's value wins"
                    );
                }
            }

            tasks.sheets.push(SheetTask {
                sheet_name,
                prompt_template: spec.prompt,
                key_schema: KeySchema::new(schema),
                provider_name,
            });
        }

        for (placeholder_name, spec) in paragraphs {
            let provider_name = spec
                .provider
                .clone()
                .unwrap_or_else(|| settings.default_provider.clone());
            check_provider(&provider_name, format!("paragraph task '{}'", placeholder_name))?;

            let mut input_keys: Vec<String> = Vec::with_capacity(spec.keys.len());
            for key in spec.keys {
                if input_keys.contains(&key) {
                    return Err(ConfigError::DuplicateInputKey {
                        paragraph: placeholder_name,
                        key,
                    });
                }
                if !tasks.produces(&key) {
                    return Err(ConfigError::UnproducedKey {
                        paragraph: placeholder_name,
                        key,
                    });
                }
                input_keys.push(key);
            }

            tasks.paragraphs.push(ParagraphTask {
                placeholder_name,
                input_keys,
                prompt_template: spec.prompt,
                provider_name,
            });
        }

        for paragraph in placeholders.keys() {
            if tasks.paragraph(paragraph).is_none() {
                warn!(%paragraph, "Placeholder alias names no paragraph task; ignoring");
            }
        }
        tasks.placeholders = placeholders;

        Ok(Self {
            dir: dir.into(),
            settings,
            providers,
            tasks,
        })
    }

    /// Directory prompt paths are resolved against
    pub fn prompt_dir(&self) -> PathBuf {
        match &self.settings.prompt_dir {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.dir.join(p),
            None => self.dir.clone(),
        }
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed; the full load reports them properly.
    pub fn load_log_level(dir: impl AsRef<Path>) -> Option<String> {
        let path = dir.as_ref().join(SETTINGS_FILE);
        let content = fs::read_to_string(path).ok()?;
        let settings: Settings = serde_yaml::from_str(&content).ok()?;
        settings.log_level
    }
}

/// Pick the process-wide provider override: explicit value first, then
/// `LLM_PROVIDER`. Read once at startup.
pub fn provider_override(explicit: Option<String>) -> Option<String> {
    explicit
        .or_else(|| std::env::var(PROVIDER_OVERRIDE_ENV).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn validate_providers(providers: &IndexMap<String, ProviderSpec>) -> Result<(), ConfigError> {
    for (name, spec) in providers {
        if spec.model.trim().is_empty() {
            return Err(ConfigError::InvalidProvider {
                name: name.clone(),
                reason: "model is empty".to_string(),
            });
        }
        if spec.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidProvider {
                name: name.clone(),
                reason: "base-url is empty".to_string(),
            });
        }
        match (&spec.api_key, &spec.api_key_env) {
            (Some(_), Some(env)) => {
                warn!(provider = %name, %env, "Both api-key and api-key-env set; the literal api-key wins");
            }
            (None, None) => {
                warn!(provider = %name, "No credential source configured; tasks using it will fail");
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_yaml<T: DeserializeOwned + Default>(path: &Path, required: bool) -> Result<T, ConfigError> {
    debug!(?path, %required, "read_yaml: called");
    if !required && !path.exists() {
        debug!(?path, "read_yaml: optional file absent, using defaults");
        return Ok(T::default());
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
