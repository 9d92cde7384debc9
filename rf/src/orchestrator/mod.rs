//! Task orchestration: the extract phase, then the generate phase

mod engine;
mod report;

pub use engine::{Orchestrator, RunSettings};
pub use report::{Phase, RunReport, TaskIssue};
