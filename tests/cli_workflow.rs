//! End-to-end tests for the scriptline binary.
//!
//! Every test gets its own home directory and runs against the offline stub
//! provider, so no network access or API key is needed.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

const KEY: &str = "CH01-012";

fn scriptline(home: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_scriptline"));
    cmd.current_dir(home.path())
        .env("SCRIPTLINE_HOME", home.path().join(".scriptline"))
        .env("SCRIPTLINE_LLM_PROVIDER", "stub")
        .env_remove("RUST_LOG");
    cmd
}

fn json_of(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text.lines().last().unwrap_or_default();
    serde_json::from_str(line).unwrap_or_else(|e| panic!("not JSON ({e}): {text}"))
}

fn job_dir(home: &TempDir) -> std::path::PathBuf {
    home.path().join(".scriptline").join("jobs").join(KEY)
}

fn init(home: &TempDir) {
    scriptline(home)
        .args(["init", KEY, "--title", "The harbour"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized job CH01-012"));
}

fn run_all(home: &TempDir) -> Value {
    let output = scriptline(home)
        .args(["run-all", KEY, "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    json_of(&output)
}

fn stage_status(job: &Value, stage: &str) -> String {
    job["stages"][stage]["status"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

#[test]
fn test_init_then_run_all_completes_job() {
    let home = TempDir::new().unwrap();
    init(&home);

    let report = run_all(&home);
    assert_eq!(report["stop"], "completed");
    assert_eq!(report["job"]["status"], "completed");
    assert!(!report["runs"].as_array().unwrap().is_empty());

    let output = scriptline(&home)
        .args(["status", KEY, "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let job = json_of(&output);
    for stage in ["research", "outline", "draft", "script", "narration"] {
        assert_eq!(stage_status(&job, stage), "completed", "{stage}");
    }
    assert!(job_dir(&home).join("final/narration.txt").is_file());
}

#[test]
fn test_next_before_init_reports_missing_job() {
    let home = TempDir::new().unwrap();

    scriptline(&home)
        .args(["next", KEY])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("CH01-012"));

    assert!(!job_dir(&home).exists());
}

#[test]
fn test_invalid_key_is_a_usage_error() {
    let home = TempDir::new().unwrap();

    scriptline(&home).args(["status", "chapter one"]).assert().code(2);
}

#[test]
fn test_run_unknown_stage_is_a_usage_error() {
    let home = TempDir::new().unwrap();
    init(&home);

    scriptline(&home)
        .args(["run", KEY, "--stage", "mastering"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("mastering"));
}

#[test]
fn test_run_stage_without_prerequisites_stays_pending() {
    let home = TempDir::new().unwrap();
    init(&home);

    let output = scriptline(&home)
        .args(["run", KEY, "--stage", "draft", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let view = json_of(&output);
    assert_eq!(view["stage"], "draft");
    assert_eq!(view["outcome"]["outcome"], "pending");
    assert_eq!(view["outcome"]["code"], "prerequisite_incomplete");
    assert_eq!(stage_status(&view["job"], "draft"), "pending");
}

#[test]
fn test_init_twice_needs_force() {
    let home = TempDir::new().unwrap();
    init(&home);

    scriptline(&home).args(["init", KEY]).assert().failure();
    scriptline(&home).args(["init", KEY, "--force"]).assert().success();
}

#[test]
fn test_validate_file_with_errors_exits_with_validation_code() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("short.md");
    std::fs::write(&file, "# Heading\n\nToo short.\n").unwrap();

    scriptline(&home)
        .args(["validate", "--file"])
        .arg(&file)
        .assert()
        .code(5)
        .stdout(predicate::str::contains("errors"));
}

#[test]
fn test_validate_key_checks_finished_script() {
    let home = TempDir::new().unwrap();
    init(&home);
    run_all(&home);

    let output = scriptline(&home)
        .args(["validate", "--key", KEY, "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let view = json_of(&output);
    assert_eq!(view["valid"], true);
    assert!(view["file"].as_str().unwrap().ends_with("content/script.md"));
}

#[test]
fn test_reset_from_script_reopens_tail() {
    let home = TempDir::new().unwrap();
    init(&home);
    run_all(&home);

    let output = scriptline(&home)
        .args(["reset", KEY, "--from", "script", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let view = json_of(&output);
    let job = &view["job"];
    assert_eq!(stage_status(job, "draft"), "completed");
    assert_eq!(stage_status(job, "script"), "pending");
    assert_eq!(stage_status(job, "narration"), "pending");
    assert_ne!(job["status"], "completed");

    // A second run-all finishes the job again
    let report = run_all(&home);
    assert_eq!(report["job"]["status"], "completed");
}

#[test]
fn test_reconcile_downgrades_stage_with_deleted_output() {
    let home = TempDir::new().unwrap();
    init(&home);
    run_all(&home);
    std::fs::remove_file(job_dir(&home).join("final/narration.txt")).unwrap();

    // Without the flag a completed stage is left alone
    let output = scriptline(&home)
        .args(["reconcile", KEY, "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report = json_of(&output);
    assert_eq!(stage_status(&report["job"], "narration"), "completed");

    let output = scriptline(&home)
        .args(["reconcile", KEY, "--allow-downgrade", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report = json_of(&output);
    assert_eq!(stage_status(&report["job"], "narration"), "pending");
    let changes = report["changes"].as_array().unwrap();
    assert!(changes.iter().any(|c| c["stage"] == "narration"));

    // The missing artifact is regenerated by the next step
    scriptline(&home).args(["next", KEY]).assert().success();
    assert!(job_dir(&home).join("final/narration.txt").is_file());
}

#[test]
fn test_reconcile_promotes_hand_written_output() {
    let home = TempDir::new().unwrap();
    init(&home);

    let brief = job_dir(&home).join("research/brief.md");
    write(&brief, "The harbour opened in 1820 and served the fishing fleet.\n");

    let output = scriptline(&home)
        .args(["reconcile", KEY, "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report = json_of(&output);
    assert_eq!(stage_status(&report["job"], "research"), "completed");
}

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}
