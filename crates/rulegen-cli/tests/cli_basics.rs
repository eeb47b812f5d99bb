#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{rulegen_cmd, write_catalog};
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn help_lists_commands() {
    let dir = tempdir().unwrap();
    rulegen_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("reset"));
}

#[test]
fn version_flag_prints_version() {
    let dir = tempdir().unwrap();
    rulegen_cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unknown_flag_is_usage_error() {
    let dir = tempdir().unwrap();
    rulegen_cmd(dir.path())
        .args(["run", "--bogus"])
        .assert()
        .code(2);
}

#[test]
fn init_writes_config_and_refuses_to_overwrite() {
    let dir = tempdir().unwrap();
    rulegen_cmd(dir.path()).arg("init").assert().success();

    let written = std::fs::read_to_string(dir.path().join("rulegen.toml")).unwrap();
    assert!(written.contains("[api]"));
    assert!(written.contains("max_workers = 4"));

    rulegen_cmd(dir.path())
        .arg("init")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--force"));

    rulegen_cmd(dir.path())
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn malformed_config_is_usage_error() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("rulegen.toml"), "[api\nmodel = ").unwrap();
    rulegen_cmd(dir.path())
        .arg("status")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to parse config"));
}

#[test]
fn status_on_empty_store() {
    let dir = tempdir().unwrap();
    rulegen_cmd(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No libraries processed yet."));
}

#[test]
fn status_json_counts_records() {
    let dir = tempdir().unwrap();
    let log = [
        r#"{"id":"a/b/ok","status":"succeeded","updatedAt":"2026-01-01T00:00:00Z"}"#,
        r#"{"id":"a/b/bad","status":"failed","reason":"HTTP 401","updatedAt":"2026-01-01T00:00:00Z"}"#,
    ]
    .join("\n");
    std::fs::write(dir.path().join("mdc_generation_progress.jsonl"), log + "\n").unwrap();

    let out = rulegen_cmd(dir.path())
        .args(["status", "--format", "json", "--failed"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["succeeded"], 1);
    assert_eq!(v["failed"], 1);
    assert_eq!(v["total"], 2);
    assert_eq!(v["failures"][0]["id"], "a/b/bad");
    assert_eq!(v["failures"][0]["reason"], "HTTP 401");
}

#[test]
fn reset_failed_only_keeps_successes() {
    let dir = tempdir().unwrap();
    let log = [
        r#"{"id":"a/b/ok","status":"succeeded","updatedAt":"2026-01-01T00:00:00Z"}"#,
        r#"{"id":"a/b/bad","status":"failed","reason":"HTTP 401","updatedAt":"2026-01-01T00:00:00Z"}"#,
    ]
    .join("\n");
    std::fs::write(dir.path().join("mdc_generation_progress.jsonl"), log + "\n").unwrap();

    rulegen_cmd(dir.path())
        .args(["reset", "--failed-only"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 failed record(s)"));

    rulegen_cmd(dir.path())
        .args(["status", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"succeeded\": 1"))
        .stdout(predicate::str::contains("\"failed\": 0"));
}

#[test]
fn run_without_api_key_is_usage_error() {
    let dir = tempdir().unwrap();
    write_catalog(dir.path());
    rulegen_cmd(dir.path())
        .args(["run", "--test", "--no-log-file"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("RULEGEN_API_KEY"));
}

#[test]
fn run_without_catalog_is_not_found() {
    let dir = tempdir().unwrap();
    rulegen_cmd(dir.path())
        .env(common::API_KEY_ENV, "test-key")
        .args(["run", "--no-log-file"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("libraries.json"));
}

#[test]
fn run_rejects_zero_workers() {
    let dir = tempdir().unwrap();
    write_catalog(dir.path());
    rulegen_cmd(dir.path())
        .env(common::API_KEY_ENV, "test-key")
        .args(["run", "--workers", "0", "--no-log-file"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("max_workers"));
}
