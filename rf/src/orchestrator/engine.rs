//! Two-phase run: extract every sheet, then generate every paragraph
//!
//! Tasks within a phase run concurrently up to a limit. The generate phase
//! starts only after every extraction has finished. A failed task is recorded
//! in the report and never stops its siblings.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::report::{Phase, RunReport};
use crate::agent;
use crate::domain::{FactMapping, FactValue, ParagraphTask, SheetTask, TaskConfig, Workbook};
use crate::error::TaskError;
use crate::llm::{LlmClient, ProviderRegistry};
use crate::prompts::PromptLoader;

/// Run-wide knobs
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Maximum tasks in flight within one phase (at least 1)
    pub max_concurrency: usize,
    /// Whole-run deadline
    pub timeout: Option<Duration>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            timeout: None,
        }
    }
}

/// Drives both phases over shared, read-only collaborators
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ProviderRegistry>,
    prompts: Arc<PromptLoader>,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ProviderRegistry>,
        prompts: Arc<PromptLoader>,
        settings: RunSettings,
    ) -> Self {
        debug!(?settings, "Orchestrator::new: called");
        Self {
            llm,
            registry,
            prompts,
            settings,
        }
    }

    /// Run both phases to completion
    pub async fn run(&self, tasks: &TaskConfig, workbook: &Workbook) -> RunReport {
        self.run_with_cancel(tasks, workbook, CancellationToken::new()).await
    }

    /// Run both phases, stopping early when `cancel` fires or the run times out
    ///
    /// Work finished before cancellation is kept; everything else is
    /// recorded as `Cancelled`.
    pub async fn run_with_cancel(
        &self,
        tasks: &TaskConfig,
        workbook: &Workbook,
        cancel: CancellationToken,
    ) -> RunReport {
        let mut report = RunReport::new();
        info!(
            run_id = %report.run_id,
            sheets = tasks.sheets.len(),
            paragraphs = tasks.paragraphs.len(),
            provider_override = ?self.registry.override_name(),
            "Run starting"
        );

        let token = cancel.child_token();
        let timer = self.settings.timeout.map(|timeout| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(?timeout, "Run timed out; cancelling unfinished tasks");
                token.cancel();
            })
        });

        info!(sheets = tasks.sheets.len(), "Extract phase starting");
        let results = self.extract_phase(&tasks.sheets, workbook, &token).await;
        for (task, result) in tasks.sheets.iter().zip(results) {
            match result {
                Ok(values) => {
                    for key in report.facts.merge_sheet(&task.sheet_name, values) {
                        report.warnings.push(format!(
                            "fact '{}' overwritten by sheet '{}'",
                            key, task.sheet_name
                        ));
                    }
                }
                Err(e) => {
                    warn!(sheet = %task.sheet_name, kind = e.kind(), error = %e, "Extraction failed");
                    report.record(Phase::Extract, &task.sheet_name, e);
                }
            }
        }
        info!(
            facts = report.facts.len(),
            failed = report.failed_tasks(Phase::Extract).len(),
            "Extract phase finished"
        );

        if token.is_cancelled() {
            debug!("run_with_cancel: cancelled after extract phase, skipping generation");
            for task in &tasks.paragraphs {
                report.record(Phase::Generate, &task.placeholder_name, TaskError::Cancelled);
            }
        } else {
            info!(paragraphs = tasks.paragraphs.len(), "Generate phase starting");
            let results = self.generate_phase(&tasks.paragraphs, &report.facts, &token).await;
            for (task, result) in tasks.paragraphs.iter().zip(results) {
                match result {
                    Ok(text) => report.placeholders.insert(&task.placeholder_name, text),
                    Err(e) => {
                        warn!(paragraph = %task.placeholder_name, kind = e.kind(), error = %e, "Generation failed");
                        report.record(Phase::Generate, &task.placeholder_name, e);
                    }
                }
            }
            info!(
                paragraphs = report.placeholders.len(),
                failed = report.failed_tasks(Phase::Generate).len(),
                "Generate phase finished"
            );
        }

        if let Some(timer) = timer {
            timer.abort();
        }
        report.cancelled = token.is_cancelled();
        report.finished_at = chrono::Utc::now();
        info!(
            run_id = %report.run_id,
            issues = report.issues.len(),
            cancelled = report.cancelled,
            "Run finished"
        );
        report
    }

    async fn extract_phase(
        &self,
        sheets: &[SheetTask],
        workbook: &Workbook,
        token: &CancellationToken,
    ) -> Vec<Result<IndexMap<String, FactValue>, TaskError>> {
        let semaphore = Semaphore::new(self.settings.max_concurrency.max(1));
        let semaphore = &semaphore;
        join_all(sheets.iter().map(|task| async move {
            let work = async {
                let _permit = semaphore.acquire().await.map_err(|_| TaskError::Cancelled)?;
                self.extract_one(task, workbook).await
            };
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(TaskError::Cancelled),
                result = work => result,
            }
        }))
        .await
    }

    async fn extract_one(
        &self,
        task: &SheetTask,
        workbook: &Workbook,
    ) -> Result<IndexMap<String, FactValue>, TaskError> {
        debug!(sheet = %task.sheet_name, "extract_one: called");
        let sheet = workbook
            .get(&task.sheet_name)
            .ok_or_else(|| TaskError::SheetNotFound(task.sheet_name.clone()))?;
        let provider = self.registry.resolve(&task.provider_name)?;
        agent::extract(self.llm.as_ref(), &self.prompts, &provider, task, sheet).await
    }

    async fn generate_phase(
        &self,
        paragraphs: &[ParagraphTask],
        facts: &FactMapping,
        token: &CancellationToken,
    ) -> Vec<Result<String, TaskError>> {
        let semaphore = Semaphore::new(self.settings.max_concurrency.max(1));
        let semaphore = &semaphore;
        join_all(paragraphs.iter().map(|task| async move {
            let work = async {
                let _permit = semaphore.acquire().await.map_err(|_| TaskError::Cancelled)?;
                self.generate_one(task, facts).await
            };
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(TaskError::Cancelled),
                result = work => result,
            }
        }))
        .await
    }

    async fn generate_one(&self, task: &ParagraphTask, facts: &FactMapping) -> Result<String, TaskError> {
        debug!(paragraph = %task.placeholder_name, "generate_one: called");
        let selected = agent::select_facts(task, facts)?;
        let provider = self.registry.resolve(&task.provider_name)?;
        agent::generate(self.llm.as_ref(), &self.prompts, &provider, task, &selected).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSpec;
    use crate::domain::{KeyKind, KeySchema};
    use crate::llm::client::mock::{MockLlmClient, MockReply};
    use crate::llm::LlmError;
    use std::path::PathBuf;

    const EXTRACT_TEMPLATE: &str = "Extract from {{sheet}}:\n{{table}}";
    const PARAGRAPH_TEMPLATE: &str = "Write {{placeholder}} using {{#each facts}}{{@key}}={{this}};{{/each}}";

    fn registry(override_name: Option<&str>) -> Arc<ProviderRegistry> {
        let mut providers = IndexMap::new();
        providers.insert(
            "openai".to_string(),
            ProviderSpec::new("gpt-4o", "https://api.openai.com/v1").with_api_key("sk-openai"),
        );
        providers.insert(
            "qwen".to_string(),
            ProviderSpec::new("qwen-plus", "https://dashscope.example/v1").with_api_key("sk-qwen"),
        );
        providers.insert(
            "nokey".to_string(),
            ProviderSpec::new("m", "https://x").with_api_key_env("NOKEY_API_KEY"),
        );
        Arc::new(ProviderRegistry::with_env_lookup(
            providers,
            override_name.map(str::to_string),
            |_| None,
        ))
    }

    fn prompts() -> Arc<PromptLoader> {
        let mut loader = PromptLoader::new(".");
        loader.register_inline("extract.hbs", EXTRACT_TEMPLATE).unwrap();
        loader.register_inline("paragraph.hbs", PARAGRAPH_TEMPLATE).unwrap();
        Arc::new(loader)
    }

    fn sheet(name: &str, keys: &[&str], provider: &str) -> SheetTask {
        SheetTask {
            sheet_name: name.to_string(),
            prompt_template: PathBuf::from("extract.hbs"),
            key_schema: KeySchema::new(keys.iter().map(|k| (k.to_string(), KeyKind::Number)).collect()),
            provider_name: provider.to_string(),
        }
    }

    fn paragraph(name: &str, keys: &[&str]) -> ParagraphTask {
        ParagraphTask {
            placeholder_name: name.to_string(),
            input_keys: keys.iter().map(|k| k.to_string()).collect(),
            prompt_template: PathBuf::from("paragraph.hbs"),
            provider_name: "openai".to_string(),
        }
    }

    fn tasks() -> TaskConfig {
        TaskConfig {
            sheets: vec![
                sheet("RawData_A", &["Cmax", "Tmax"], "openai"),
                sheet("RawData_B", &["Dose"], "openai"),
            ],
            paragraphs: vec![
                paragraph("IntroParagraph", &["Cmax", "Tmax"]),
                paragraph("DoseParagraph", &["Dose"]),
            ],
            ..Default::default()
        }
    }

    fn workbook() -> Workbook {
        Workbook::from_json_str(
            r#"{
                "RawData_A": [{"Time": 0.5, "Conc": 3.1}, {"Time": 2.0, "Conc": 12.3}],
                "RawData_B": [{"Dose": 100}]
            }"#,
        )
        .unwrap()
    }

    fn orchestrator(llm: Arc<MockLlmClient>, registry: Arc<ProviderRegistry>, settings: RunSettings) -> Orchestrator {
        Orchestrator::new(llm, registry, prompts(), settings)
    }

    fn happy_llm() -> MockLlmClient {
        MockLlmClient::new()
            .reply("Extract from RawData_A", r#"{"Cmax": 12.3, "Tmax": 2.0}"#)
            .reply("Extract from RawData_B", r#"{"Dose": 100}"#)
            .reply("Write IntroParagraph", "Cmax was 12.3 at 2.0 h.")
            .reply("Write DoseParagraph", "A 100 mg dose was given.")
    }

    #[tokio::test]
    async fn test_two_phase_run() {
        let llm = Arc::new(happy_llm());
        let orch = orchestrator(llm.clone(), registry(None), RunSettings::default());
        let report = orch.run(&tasks(), &workbook()).await;

        assert!(report.is_clean(), "{}", report.summary());
        assert_eq!(report.facts.get("Cmax").and_then(|v| v.as_f64()), Some(12.3));
        assert_eq!(report.facts.get("Dose").and_then(|v| v.as_f64()), Some(100.0));
        assert_eq!(report.placeholders.get("IntroParagraph"), Some("Cmax was 12.3 at 2.0 h."));
        assert_eq!(report.placeholders.get("DoseParagraph"), Some("A 100 mg dose was given."));

        let calls = llm.calls();
        assert_eq!(calls.len(), 4);
        // Every extraction call precedes every generation call
        assert!(calls[..2].iter().all(|c| c.tool.is_some()));
        assert!(calls[2..].iter().all(|c| c.tool.is_none()));
        assert!(calls[2].prompt.contains("Cmax=12.3;Tmax=2.0;") || calls[3].prompt.contains("Cmax=12.3;Tmax=2.0;"));
    }

    #[tokio::test]
    async fn test_failed_sheet_only_starves_dependents() {
        let llm = Arc::new(
            MockLlmClient::new()
                .reply("Extract from RawData_A", r#"{"Cmax": 12.3, "Tmax": 2.0}"#)
                .reply("Extract from RawData_B", "no idea")
                .reply("Write IntroParagraph", "Intro."),
        );
        let orch = orchestrator(llm.clone(), registry(None), RunSettings::default());
        let report = orch.run(&tasks(), &workbook()).await;

        assert_eq!(report.failed_tasks(Phase::Extract), vec!["RawData_B"]);
        assert_eq!(report.failed_tasks(Phase::Generate), vec!["DoseParagraph"]);
        assert_eq!(report.placeholders.get("IntroParagraph"), Some("Intro."));

        let issue = report.issue(Phase::Generate, "DoseParagraph").unwrap();
        assert!(matches!(&issue.error, TaskError::MissingFact { keys } if keys == &vec!["Dose".to_string()]));
        // No model call for the starved paragraph
        assert!(!llm.calls().iter().any(|c| c.prompt.contains("Write DoseParagraph")));
    }

    #[tokio::test]
    async fn test_provider_failure_is_isolated() {
        let llm = Arc::new(
            MockLlmClient::new()
                .on("Extract from RawData_A", MockReply::Fail(502))
                .reply("Extract from RawData_B", r#"{"Dose": 100}"#)
                .reply("Write DoseParagraph", "A 100 mg dose was given."),
        );
        let orch = orchestrator(llm.clone(), registry(None), RunSettings::default());
        let report = orch.run(&tasks(), &workbook()).await;

        let failed: Vec<_> = report.issues.iter().map(|i| (i.task.as_str(), i.error.kind())).collect();
        assert_eq!(
            failed,
            vec![("RawData_A", "ProviderCallError"), ("IntroParagraph", "MissingFactError")]
        );
        assert!(matches!(
            &report.issue(Phase::Extract, "RawData_A").unwrap().error,
            TaskError::ProviderCall(LlmError::ApiError { status: 502, .. })
        ));
        assert_eq!(report.placeholders.get("DoseParagraph"), Some("A 100 mg dose was given."));
        assert!(report.facts.contains("Dose"));

        // Both extractions ran before the surviving paragraph was generated
        let calls = llm.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[..2].iter().all(|c| c.tool.is_some()));
        assert!(calls[2].prompt.contains("Write DoseParagraph"));
    }

    #[tokio::test]
    async fn test_missing_sheet_recorded_without_call() {
        let llm = Arc::new(happy_llm());
        let mut tasks = tasks();
        tasks.sheets.push(sheet("RawData_C", &["AUC"], "openai"));
        let orch = orchestrator(llm.clone(), registry(None), RunSettings::default());
        let report = orch.run(&tasks, &workbook()).await;

        let issue = report.issue(Phase::Extract, "RawData_C").unwrap();
        assert_eq!(issue.error.kind(), "SheetNotFoundError");
        assert_eq!(llm.call_count(), 4);
        assert_eq!(report.placeholders.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_credential_is_isolated() {
        let llm = Arc::new(happy_llm());
        let mut tasks = tasks();
        tasks.sheets[1].provider_name = "nokey".to_string();
        let orch = orchestrator(llm.clone(), registry(None), RunSettings::default());
        let report = orch.run(&tasks, &workbook()).await;

        let issue = report.issue(Phase::Extract, "RawData_B").unwrap();
        assert_eq!(issue.error.kind(), "CredentialMissingError");
        assert!(report.facts.contains("Cmax"));
        assert!(report.placeholders.get("IntroParagraph").is_some());
    }

    #[tokio::test]
    async fn test_override_routes_every_call() {
        let llm = Arc::new(happy_llm());
        let mut tasks = tasks();
        tasks.sheets[1].provider_name = "nokey".to_string();
        let orch = orchestrator(llm.clone(), registry(Some("qwen")), RunSettings::default());
        let report = orch.run(&tasks, &workbook()).await;

        assert!(report.is_clean(), "{}", report.summary());
        assert!(llm.calls().iter().all(|c| c.provider == "qwen"));
    }

    #[tokio::test]
    async fn test_colliding_keys_last_sheet_wins() {
        let llm = Arc::new(
            MockLlmClient::new()
                .reply("Extract from RawData_A", r#"{"Dose": 50}"#)
                .reply("Extract from RawData_B", r#"{"Dose": 100}"#),
        );
        let tasks = TaskConfig {
            sheets: vec![
                sheet("RawData_A", &["Dose"], "openai"),
                sheet("RawData_B", &["Dose"], "openai"),
            ],
            ..Default::default()
        };
        let orch = orchestrator(llm, registry(None), RunSettings::default());
        let report = orch.run(&tasks, &workbook()).await;

        assert_eq!(report.facts.get("Dose").and_then(|v| v.as_f64()), Some(100.0));
        assert_eq!(report.facts.lookup("RawData_A.Dose").and_then(|f| f.value.as_f64()), Some(50.0));
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_serial_run_keeps_declaration_order() {
        let llm = Arc::new(happy_llm());
        let settings = RunSettings {
            max_concurrency: 1,
            timeout: None,
        };
        let orch = orchestrator(llm.clone(), registry(None), settings);
        orch.run(&tasks(), &workbook()).await;

        let prompts: Vec<_> = llm.calls().into_iter().map(|c| c.prompt).collect();
        assert!(prompts[0].starts_with("Extract from RawData_A"));
        assert!(prompts[1].starts_with("Extract from RawData_B"));
        assert!(prompts[2].starts_with("Write IntroParagraph"));
        assert!(prompts[3].starts_with("Write DoseParagraph"));
    }

    #[tokio::test]
    async fn test_timeout_keeps_finished_work() {
        let llm = Arc::new(
            MockLlmClient::new()
                .reply("Extract from RawData_A", r#"{"Cmax": 12.3, "Tmax": 2.0}"#)
                .on(
                    "Extract from RawData_B",
                    MockReply::Delayed(Duration::from_secs(30), r#"{"Dose": 100}"#.to_string()),
                ),
        );
        let settings = RunSettings {
            max_concurrency: 4,
            timeout: Some(Duration::from_millis(100)),
        };
        let orch = orchestrator(llm.clone(), registry(None), settings);
        let report = orch.run(&tasks(), &workbook()).await;

        assert!(report.cancelled);
        assert!(report.facts.contains("Cmax"));
        assert_eq!(
            report.issue(Phase::Extract, "RawData_B").map(|i| i.error.kind()),
            Some("Cancelled")
        );
        assert_eq!(report.failed_tasks(Phase::Generate), vec!["IntroParagraph", "DoseParagraph"]);
        assert!(report.elapsed() < chrono::Duration::seconds(10));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let llm = Arc::new(happy_llm());
        let orch = orchestrator(llm.clone(), registry(None), RunSettings::default());
        let token = CancellationToken::new();
        token.cancel();
        let report = orch.run_with_cancel(&tasks(), &workbook(), token).await;

        assert!(report.cancelled);
        assert_eq!(llm.call_count(), 0);
        assert_eq!(report.issues.len(), 4);
        assert!(report.issues.iter().all(|i| matches!(i.error, TaskError::Cancelled)));
    }
}
