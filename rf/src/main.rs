//! ReportFlow CLI entry point

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use reportflow::assembler;
use reportflow::cli::{Cli, Command};
use reportflow::config::{self, ProjectConfig};
use reportflow::domain::Workbook;
use reportflow::llm::{CredentialStatus, OpenAIClient, ProviderRegistry};
use reportflow::orchestrator::{Orchestrator, Phase, RunReport, RunSettings};
use reportflow::prompts::PromptLoader;

fn parse_level(s: &str) -> tracing::Level {
    match s.to_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Option<PathBuf> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reportflow")
        .join("logs");

    // Priority: CLI --log-level > settings.yaml > INFO
    let level = cli_log_level
        .or(config_log_level)
        .map(parse_level)
        .unwrap_or(tracing::Level::INFO);
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    let log_path = log_dir.join("reportflow.log");
    let log_file = fs::create_dir_all(&log_dir)
        .and_then(|_| fs::File::create(&log_path))
        .map_err(|e| eprintln!("Warning: cannot open {} ({}), logging to stderr", log_path.display(), e))
        .ok();

    let opened = log_file.is_some();
    match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_writer(file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init(),
        None => tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init(),
    }

    info!("Logging initialized (level: {:?})", level);
    opened.then_some(log_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = ProjectConfig::load_log_level(&cli.config_dir);
    let log_path = setup_logging(cli.log_level.as_deref(), config_log_level.as_deref());
    debug!(?log_path, command = ?cli.command, "main: dispatching command");

    match cli.command {
        Command::Run {
            workbook,
            template,
            out,
            summary,
            provider,
            concurrency,
            timeout_secs,
        } => {
            let options = RunOptions {
                workbook,
                template,
                out,
                summary,
                concurrency,
                timeout_secs,
            };
            cmd_run(&cli.config_dir, config::provider_override(provider), options).await
        }
        Command::Validate { provider } => cmd_validate(&cli.config_dir, config::provider_override(provider)),
        Command::Providers { provider } => cmd_providers(&cli.config_dir, config::provider_override(provider)),
    }
}

struct RunOptions {
    workbook: PathBuf,
    template: Option<PathBuf>,
    out: PathBuf,
    summary: Option<PathBuf>,
    concurrency: Option<usize>,
    timeout_secs: Option<u64>,
}

/// Load config and prompts; any error here is fatal
fn load_project(config_dir: &Path, provider_override: Option<&str>) -> Result<(ProjectConfig, PromptLoader)> {
    let project = ProjectConfig::load(config_dir, provider_override)
        .context(format!("Failed to load project config from {}", config_dir.display()))?;
    let prompts = PromptLoader::for_tasks(project.prompt_dir(), &project.tasks).context("Failed to load prompt templates")?;
    Ok((project, prompts))
}

async fn cmd_run(config_dir: &Path, provider_override: Option<String>, options: RunOptions) -> Result<()> {
    debug!(?config_dir, ?provider_override, workbook = ?options.workbook, "cmd_run: called");
    let (project, prompts) = load_project(config_dir, provider_override.as_deref())?;
    let workbook = Workbook::load(&options.workbook)?;
    for name in workbook.sheet_names() {
        if project.tasks.sheet(name).is_none() {
            debug!(sheet = %name, "cmd_run: sheet has no task, ignoring");
        }
    }

    let settings = RunSettings {
        max_concurrency: options.concurrency.unwrap_or(project.settings.max_concurrency),
        timeout: options
            .timeout_secs
            .or(project.settings.run_timeout_secs)
            .map(Duration::from_secs),
    };
    let registry = ProviderRegistry::new(project.providers.clone(), provider_override);
    let llm = OpenAIClient::new().context("Failed to create HTTP client")?;
    let orchestrator = Orchestrator::new(Arc::new(llm), Arc::new(registry), Arc::new(prompts), settings);

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; cancelling unfinished tasks");
                cancel.cancel();
            }
        })
    };
    let report = orchestrator.run_with_cancel(&project.tasks, &workbook, cancel).await;
    ctrl_c.abort();

    match &options.template {
        Some(template) => {
            let assembled = assembler::assemble_file(template, &project.tasks, &report.placeholders)?;
            assembled.write(&options.out)?;
            println!("{} Report written to {}", "✓".green(), options.out.display().to_string().cyan());
            if !assembled.unfilled.is_empty() {
                println!(
                    "{} Blank placeholders: {}",
                    "!".yellow(),
                    assembled.unfilled.join(", ")
                );
            }
            if !assembled.unused.is_empty() {
                println!(
                    "{} Paragraphs with no slot in the template: {}",
                    "!".yellow(),
                    assembled.unused.join(", ")
                );
            }
        }
        None => {
            for (paragraph, text) in report.placeholders.iter() {
                println!("{}", format!("[{}]", paragraph).cyan().bold());
                println!("{}\n", text);
            }
        }
    }

    if let Some(path) = &options.summary {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize run report")?;
        fs::write(path, json).context(format!("Failed to write summary {}", path.display()))?;
        debug!(?path, "cmd_run: wrote JSON summary");
    }

    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    let headline = if report.cancelled {
        "Run cancelled".yellow().bold()
    } else if report.is_clean() {
        "Run complete".green().bold()
    } else {
        "Run complete with failures".yellow().bold()
    };
    println!("{} ({})", headline, report.run_id.to_string().dimmed());

    for phase in [Phase::Extract, Phase::Generate] {
        let ok = match phase {
            Phase::Extract => report.facts.sheets().count(),
            Phase::Generate => report.placeholders.len(),
        };
        let failed = report.failed_tasks(phase);
        println!(
            "  {:<9} {} ok, {} failed",
            phase.to_string(),
            ok.to_string().green(),
            failed.len().to_string().red()
        );
        for issue in report.issues.iter().filter(|i| i.phase == phase) {
            let tag = if issue.error.is_configuration_issue() {
                " [config]".yellow()
            } else {
                "".normal()
            };
            println!(
                "    {} {} {} {}{}",
                "✗".red(),
                issue.task.yellow(),
                issue.error.kind().dimmed(),
                issue.error,
                tag
            );
        }
    }
    for warning in &report.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
    let config_issues = report.configuration_issues().count();
    if config_issues > 0 {
        println!(
            "  {} {} failure(s) point at task configuration, check keys and providers",
            "warning:".yellow(),
            config_issues
        );
    }
}

fn cmd_validate(config_dir: &Path, provider_override: Option<String>) -> Result<()> {
    debug!(?config_dir, ?provider_override, "cmd_validate: called");
    let (project, prompts) = load_project(config_dir, provider_override.as_deref())?;
    let registry = ProviderRegistry::new(project.providers.clone(), provider_override);

    println!("{} Configuration in {} is valid", "✓".green(), config_dir.display().to_string().cyan());
    println!("  Providers:  {}", project.providers.len());
    println!("  Sheets:     {}", project.tasks.sheets.len());
    println!("  Paragraphs: {}", project.tasks.paragraphs.len());
    println!("  Templates:  {}", prompts.len());

    for task in &project.tasks.sheets {
        let provider = registry.effective_name(&task.provider_name);
        println!(
            "  {} {} -> {} [{}]",
            "sheet".dimmed(),
            task.sheet_name.yellow(),
            provider,
            task.key_schema.keys().collect::<Vec<_>>().join(", ")
        );
        if !registry.credential_status(provider).is_usable() {
            println!("    {} provider '{}' has no usable credential", "!".yellow(), provider);
        }
    }
    for task in &project.tasks.paragraphs {
        println!(
            "  {} {} -> {} [{}]",
            "paragraph".dimmed(),
            task.placeholder_name.yellow(),
            registry.effective_name(&task.provider_name),
            task.input_keys.join(", ")
        );
    }
    Ok(())
}

fn cmd_providers(config_dir: &Path, provider_override: Option<String>) -> Result<()> {
    debug!(?config_dir, ?provider_override, "cmd_providers: called");
    let project = ProjectConfig::load(config_dir, provider_override.as_deref())
        .context(format!("Failed to load project config from {}", config_dir.display()))?;
    let registry = ProviderRegistry::new(project.providers.clone(), provider_override);

    for name in registry.provider_names() {
        let Some(spec) = registry.spec(name) else { continue };
        let marker = if registry.override_name() == Some(name) {
            "*".green().bold()
        } else {
            " ".normal()
        };
        let credential = match registry.credential_status(name) {
            CredentialStatus::Literal => "api-key".green(),
            CredentialStatus::Env(var) => format!("${}", var).green(),
            CredentialStatus::MissingEnv(var) => format!("${} (unset)", var).red(),
            CredentialStatus::Unconfigured => "none".red(),
        };
        println!(
            "{} {:<12} {:<20} {} {}",
            marker,
            name.cyan(),
            spec.model,
            spec.base_url.dimmed(),
            credential
        );
    }
    if let Some(name) = registry.override_name() {
        println!("\n{} every task is routed to '{}'", "*".green().bold(), name);
    }
    Ok(())
}
