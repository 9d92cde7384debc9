//! Provider registry: name -> connection settings and credential
//!
//! Credentials are read from the environment once, when the registry is
//! built. Resolution afterwards is pure and safe to call from any task.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::config::ProviderSpec;
use crate::error::TaskError;

/// Everything needed to call one provider
#[derive(Clone)]
pub struct ResolvedProvider {
    pub name: String,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub temperature: Option<f32>,
    pub max_retries: u32,
}

impl fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Where a provider's credential comes from, for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    /// Literal `api-key` in the config
    Literal,
    /// Environment variable that is set
    Env(String),
    /// Environment variable that is unset or empty
    MissingEnv(String),
    /// No credential source configured
    Unconfigured,
}

impl CredentialStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, CredentialStatus::Literal | CredentialStatus::Env(_))
    }
}

/// Read-only lookup of providers, shared by all tasks of a run
pub struct ProviderRegistry {
    providers: IndexMap<String, ProviderSpec>,
    provider_override: Option<String>,
    env: HashMap<String, String>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("provider_override", &self.provider_override)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    /// Build from config, snapshotting referenced environment variables
    pub fn new(providers: IndexMap<String, ProviderSpec>, provider_override: Option<String>) -> Self {
        Self::with_env_lookup(providers, provider_override, |var| std::env::var(var).ok())
    }

    /// Build with a custom environment lookup
    pub fn with_env_lookup(
        providers: IndexMap<String, ProviderSpec>,
        provider_override: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        debug!(providers = providers.len(), ?provider_override, "ProviderRegistry::new: called");
        let env = providers
            .values()
            .filter_map(|spec| spec.api_key_env.as_deref())
            .filter_map(|var| lookup(var).map(|value| (var.to_string(), value)))
            .collect();
        Self {
            providers,
            provider_override,
            env,
        }
    }

    /// Process-wide override, if any
    pub fn override_name(&self) -> Option<&str> {
        self.provider_override.as_deref()
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn spec(&self, name: &str) -> Option<&ProviderSpec> {
        self.providers.get(name)
    }

    /// Name a task's provider resolves to once the override is applied
    pub fn effective_name<'a>(&'a self, declared: &'a str) -> &'a str {
        self.provider_override.as_deref().unwrap_or(declared)
    }

    /// Resolve a task's declared provider into call settings
    ///
    /// The override, when set, replaces `declared` entirely. A literal
    /// `api-key` wins over `api-key-env`.
    pub fn resolve(&self, declared: &str) -> Result<ResolvedProvider, TaskError> {
        let name = self.effective_name(declared);
        debug!(%declared, %name, "ProviderRegistry::resolve: called");

        let spec = self
            .providers
            .get(name)
            .ok_or_else(|| TaskError::Configuration(format!("unknown provider '{}'", name)))?;

        let api_key = match self.credential_status(name) {
            CredentialStatus::Literal => spec
                .api_key
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            CredentialStatus::Env(var) => self.env.get(&var).map(|v| v.trim().to_string()).unwrap_or_default(),
            CredentialStatus::MissingEnv(var) => {
                warn!(provider = %name, %var, "Credential environment variable is not set");
                return Err(TaskError::CredentialMissing {
                    provider: name.to_string(),
                    hint: format!("set the {} environment variable", var),
                });
            }
            CredentialStatus::Unconfigured => {
                warn!(provider = %name, "Provider has no credential source");
                return Err(TaskError::CredentialMissing {
                    provider: name.to_string(),
                    hint: "configure api-key or api-key-env".to_string(),
                });
            }
        };

        Ok(ResolvedProvider {
            name: name.to_string(),
            model: spec.model.clone(),
            base_url: spec.base_url.clone(),
            api_key,
            max_tokens: spec.max_tokens,
            timeout: Duration::from_millis(spec.timeout_ms),
            temperature: spec.temperature,
            max_retries: spec.max_retries,
        })
    }

    /// Credential source of a provider, without resolving it
    pub fn credential_status(&self, name: &str) -> CredentialStatus {
        let Some(spec) = self.providers.get(name) else {
            return CredentialStatus::Unconfigured;
        };
        if spec.api_key.as_deref().is_some_and(|k| !k.trim().is_empty()) {
            return CredentialStatus::Literal;
        }
        match spec.api_key_env.as_deref() {
            Some(var) if self.env.get(var).is_some_and(|v| !v.trim().is_empty()) => {
                CredentialStatus::Env(var.to_string())
            }
            Some(var) => CredentialStatus::MissingEnv(var.to_string()),
            None => CredentialStatus::Unconfigured,
        }
    }
}
