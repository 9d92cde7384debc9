//! Outcome of one run

use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::domain::{FactMapping, PlaceholderMapping};
use crate::error::TaskError;

/// The two sequential phases of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Extract,
    Generate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Extract => write!(f, "extract"),
            Phase::Generate => write!(f, "generate"),
        }
    }
}

/// A failed task and why
#[derive(Debug)]
pub struct TaskIssue {
    pub phase: Phase,
    /// Sheet name or paragraph id
    pub task: String,
    pub error: TaskError,
}

impl Serialize for TaskIssue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("TaskIssue", 4)?;
        s.serialize_field("phase", &self.phase)?;
        s.serialize_field("task", &self.task)?;
        s.serialize_field("kind", self.error.kind())?;
        s.serialize_field("message", &self.error.to_string())?;
        s.end()
    }
}

/// Everything a run produced: facts, paragraphs and the failures in between
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub facts: FactMapping,
    pub placeholders: PlaceholderMapping,
    pub issues: Vec<TaskIssue>,
    pub warnings: Vec<String>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::now_v7(),
            started_at: now,
            finished_at: now,
            facts: FactMapping::new(),
            placeholders: PlaceholderMapping::new(),
            issues: Vec::new(),
            warnings: Vec::new(),
            cancelled: false,
        }
    }

    pub fn record(&mut self, phase: Phase, task: impl Into<String>, error: TaskError) {
        self.issues.push(TaskIssue {
            phase,
            task: task.into(),
            error,
        });
    }

    /// No task failed and nothing was cancelled
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && !self.cancelled
    }

    /// Names of the tasks that failed in `phase`, in declaration order
    pub fn failed_tasks(&self, phase: Phase) -> Vec<&str> {
        self.issues
            .iter()
            .filter(|i| i.phase == phase)
            .map(|i| i.task.as_str())
            .collect()
    }

    /// The issue recorded for a task, if it failed
    pub fn issue(&self, phase: Phase, task: &str) -> Option<&TaskIssue> {
        self.issues.iter().find(|i| i.phase == phase && i.task == task)
    }

    /// Failures caused by the task configuration rather than the model
    pub fn configuration_issues(&self) -> impl Iterator<Item = &TaskIssue> {
        self.issues.iter().filter(|i| i.error.is_configuration_issue())
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Plain-text account of what succeeded and what failed
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let status = if self.cancelled { "cancelled" } else { "finished" };
        let _ = writeln!(
            out,
            "Run {} {} in {:.2}s",
            self.run_id,
            status,
            self.elapsed().num_milliseconds() as f64 / 1000.0
        );

        let _ = writeln!(
            out,
            "Extract: {} sheet(s) ok, {} failed, {} fact(s)",
            self.facts.sheets().count(),
            self.failed_tasks(Phase::Extract).len(),
            self.facts.len()
        );
        for sheet in self.facts.sheets() {
            let _ = writeln!(out, "  ok     {}", sheet);
        }
        for issue in self.issues.iter().filter(|i| i.phase == Phase::Extract) {
            write_issue(&mut out, issue);
        }

        let _ = writeln!(
            out,
            "Generate: {} paragraph(s) ok, {} failed",
            self.placeholders.len(),
            self.failed_tasks(Phase::Generate).len()
        );
        for (paragraph, _) in self.placeholders.iter() {
            let _ = writeln!(out, "  ok     {}", paragraph);
        }
        for issue in self.issues.iter().filter(|i| i.phase == Phase::Generate) {
            write_issue(&mut out, issue);
        }

        for warning in &self.warnings {
            let _ = writeln!(out, "warning: {}", warning);
        }
        let config_issues = self.configuration_issues().count();
        if config_issues > 0 {
            let _ = writeln!(
                out,
                "warning: {} failure(s) point at task configuration (marked [config])",
                config_issues
            );
        }
        out
    }
}

fn write_issue(out: &mut String, issue: &TaskIssue) {
    let tag = if issue.error.is_configuration_issue() { " [config]" } else { "" };
    let _ = writeln!(
        out,
        "  FAILED {}: {}: {}{}",
        issue.task,
        issue.error.kind(),
        issue.error,
        tag
    );
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
