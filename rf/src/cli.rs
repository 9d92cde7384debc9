//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default project directory
pub const DEFAULT_CONFIG_DIR: &str = "configs";

/// Default assembled report path
pub const DEFAULT_REPORT_PATH: &str = "report_out.md";

/// ReportFlow - spreadsheet facts in, report paragraphs out
#[derive(Parser, Debug)]
#[command(name = "rf", version, about = "Extract facts from spreadsheet sheets and write report paragraphs with LLMs")]
pub struct Cli {
    /// Project configuration directory
    #[arg(short, long = "config-dir", global = true, default_value = DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the extract and generate phases over a workbook
    Run {
        /// Workbook JSON (sheet name -> array of row objects)
        #[arg(value_name = "WORKBOOK")]
        workbook: PathBuf,

        /// Report template whose {{placeholders}} receive the paragraphs
        #[arg(short, long)]
        template: Option<PathBuf>,

        /// Where to write the assembled report
        #[arg(short, long, default_value = DEFAULT_REPORT_PATH)]
        out: PathBuf,

        /// Also write the run report as JSON
        #[arg(long, value_name = "PATH")]
        summary: Option<PathBuf>,

        /// Route every task to this provider (overrides LLM_PROVIDER)
        #[arg(short, long)]
        provider: Option<String>,

        /// Maximum tasks in flight per phase
        #[arg(long)]
        concurrency: Option<usize>,

        /// Cancel unfinished tasks after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Load and check the project configuration and prompt templates
    Validate {
        /// Validate as if every task used this provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// List configured providers and their credential status
    Providers {
        /// Mark this provider as the override
        #[arg(short, long)]
        provider: Option<String>,
    },
}
