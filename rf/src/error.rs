//! Per-task error taxonomy
//!
//! Task errors never abort a run: the orchestrator records them next to the
//! task that raised them and keeps going. Load-time failures live in
//! [`crate::config::ConfigError`] instead.

use thiserror::Error;

use crate::llm::LlmError;

/// Failure of a single extraction or generation task
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no usable credential for provider '{provider}' ({hint})")]
    CredentialMissing { provider: String, hint: String },

    #[error("provider call failed: {0}")]
    ProviderCall(#[from] LlmError),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("schema validation failed for key '{key}': {reason}")]
    SchemaValidation { key: String, reason: String },

    #[error("missing facts: {}", keys.join(", "))]
    MissingFact { keys: Vec<String> },

    #[error("sheet '{0}' not found in workbook")]
    SheetNotFound(String),

    #[error("prompt template error: {0}")]
    Template(String),

    #[error("run cancelled before the task completed")]
    Cancelled,
}

impl TaskError {
    /// Taxonomy name used in run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Configuration(_) => "ConfigurationError",
            TaskError::CredentialMissing { .. } => "CredentialMissingError",
            TaskError::ProviderCall(_) => "ProviderCallError",
            TaskError::MalformedResponse(_) => "MalformedResponseError",
            TaskError::SchemaValidation { .. } => "SchemaValidationError",
            TaskError::MissingFact { .. } => "MissingFactError",
            TaskError::SheetNotFound(_) => "SheetNotFoundError",
            TaskError::Template(_) => "TemplateError",
            TaskError::Cancelled => "Cancelled",
        }
    }

    /// Whether the failure points at configuration rather than the model
    pub fn is_configuration_issue(&self) -> bool {
        matches!(
            self,
            TaskError::Configuration(_)
                | TaskError::CredentialMissing { .. }
                | TaskError::MissingFact { .. }
                | TaskError::SheetNotFound(_)
                | TaskError::Template(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(TaskError::Cancelled.kind(), "Cancelled");
        assert_eq!(
            TaskError::SchemaValidation {
                key: "Cmax".into(),
                reason: "missing".into()
            }
            .kind(),
            "SchemaValidationError"
        );
        assert_eq!(TaskError::from(LlmError::EmptyResponse).kind(), "ProviderCallError");
    }

    #[test]
    fn test_display_names_offending_key() {
        let err = TaskError::SchemaValidation {
            key: "Tmax".into(),
            reason: "key missing from response".into(),
        };
        assert!(err.to_string().contains("'Tmax'"));

        let err = TaskError::MissingFact {
            keys: vec!["AUC".into(), "Vd".into()],
        };
        assert_eq!(err.to_string(), "missing facts: AUC, Vd");
    }

    #[test]
    fn test_configuration_classification() {
        assert!(TaskError::MissingFact { keys: vec![] }.is_configuration_issue());
        assert!(!TaskError::MalformedResponse("x".into()).is_configuration_issue());
        assert!(!TaskError::Cancelled.is_configuration_issue());
    }
}
