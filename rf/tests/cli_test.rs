//! CLI tests for the `rf` binary
//!
//! None of these reach a model: every run here either stops at load time or
//! has no usable credentials.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn sample_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("configs")
}

/// `rf` with logs redirected and provider environment cleared
fn rf(data_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("rf").unwrap();
    cmd.env("XDG_DATA_HOME", data_home.path())
        .env_remove("LLM_PROVIDER")
        .env_remove("OPENAI_API_KEY")
        .env_remove("DASHSCOPE_API_KEY");
    cmd
}

#[test]
fn test_help() {
    let home = TempDir::new().unwrap();
    rf(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("providers"));
}

#[test]
fn test_validate_sample_project() {
    let home = TempDir::new().unwrap();
    rf(&home)
        .args(["validate", "-c"])
        .arg(sample_dir())
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("RawData_A"))
        .stdout(predicate::str::contains("DosingParagraph"));
}

#[test]
fn test_validate_rejects_unknown_override() {
    let home = TempDir::new().unwrap();
    rf(&home)
        .args(["validate", "--provider", "mistral", "-c"])
        .arg(sample_dir())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown provider 'mistral'"));
}

#[test]
fn test_override_from_environment() {
    let home = TempDir::new().unwrap();
    rf(&home)
        .env("LLM_PROVIDER", "mistral")
        .args(["validate", "-c"])
        .arg(sample_dir())
        .assert()
        .failure();
}

#[test]
fn test_validate_missing_project() {
    let home = TempDir::new().unwrap();
    rf(&home)
        .args(["validate", "-c"])
        .arg(home.path().join("nowhere"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("providers.yaml"));
}

#[test]
fn test_providers_shows_credential_status() {
    let home = TempDir::new().unwrap();
    rf(&home)
        .env("OPENAI_API_KEY", "sk-test")
        .args(["providers", "--provider", "qwen", "-c"])
        .arg(sample_dir())
        .assert()
        .success()
        .stdout(predicate::str::contains("$OPENAI_API_KEY"))
        .stdout(predicate::str::contains("$DASHSCOPE_API_KEY (unset)"))
        .stdout(predicate::str::contains("every task is routed to 'qwen'"));
}

#[test]
fn test_run_with_failing_tasks_still_succeeds() {
    let home = TempDir::new().unwrap();
    let out = home.path().join("report.md");
    let summary = home.path().join("summary.json");

    rf(&home)
        .arg("run")
        .arg(sample_dir().join("workbook.json"))
        .arg("-t")
        .arg(sample_dir().join("templates/report_template.md"))
        .arg("-o")
        .arg(&out)
        .arg("--summary")
        .arg(&summary)
        .arg("-c")
        .arg(sample_dir())
        .assert()
        .success()
        .stdout(predicate::str::contains("CredentialMissingError"))
        .stdout(predicate::str::contains("point at task configuration"));

    let report = std::fs::read_to_string(&out).unwrap();
    assert!(report.contains("# Pharmacokinetic Study Report"));
    assert!(!report.contains("{{INTRO}}"));

    let summary: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(summary["issues"][0]["kind"], "CredentialMissingError");
    assert_eq!(summary["issues"][2]["kind"], "MissingFactError");
    assert_eq!(summary["cancelled"], false);
}

#[test]
fn test_run_missing_workbook_fails() {
    let home = TempDir::new().unwrap();
    rf(&home)
        .arg("run")
        .arg(home.path().join("missing.json"))
        .arg("-c")
        .arg(sample_dir())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read workbook"));
}
