// Command-line surface: help text and failures that happen before any network call

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("material-tracker").unwrap();

    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("material requests"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("export"));
}

#[test]
fn test_invalid_status_is_rejected_by_the_parser() {
    let mut cmd = Command::cargo_bin("material-tracker").unwrap();

    cmd.args(["status", "5b0f6c7e-2f4a-4c1e-9d7b-0a1e2f3c4d5e", "shipped"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown status 'shipped'"));
}

#[test]
fn test_missing_credentials_fail_without_contacting_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("material-tracker.toml");
    fs::write(
        &config,
        "[store]\nbase_url = \"http://127.0.0.1:9\"\n\n[observability]\njson_logs = false\n",
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("material-tracker").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("MATERIAL_TRACKER__AUTH__USER_ID")
        .env_remove("MATERIAL_TRACKER__AUTH__ACCESS_TOKEN")
        .args(["--config", config.to_str().unwrap(), "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not signed in"));
}
