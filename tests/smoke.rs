//! Smoke tests -- verify the binary runs and key subcommands work.

use assert_cmd::Command;
use predicates::prelude::*;

fn stagewatch(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("stagewatch").unwrap();
    cmd.current_dir(dir.path()).env_remove("STAGEWATCH_CONFIG");
    cmd
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("stagewatch")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("four-stage data pipeline"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("stagewatch")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stagewatch"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("stagewatch")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_locations_lists_presets() {
    let dir = tempfile::tempdir().unwrap();
    stagewatch(&dir)
        .arg("locations")
        .assert()
        .success()
        .stdout(predicate::str::contains("London,uk"))
        .stdout(predicate::str::contains("Tokyo,jp"));
}

#[test]
fn test_offline_trigger_is_persisted() {
    let dir = tempfile::tempdir().unwrap();

    stagewatch(&dir)
        .args(["trigger", "--offline", "--location", "Sydney,au"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Outcome:      success"));

    stagewatch(&dir)
        .args(["history", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"location\": \"Sydney\""));

    stagewatch(&dir)
        .args(["stats", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"successful\": 1"));

    stagewatch(&dir)
        .arg("audit")
        .assert()
        .success()
        .stdout(predicate::str::contains("reporting"));
}

#[test]
fn test_trigger_rejects_malformed_location() {
    let dir = tempfile::tempdir().unwrap();
    stagewatch(&dir)
        .args(["trigger", "--offline", "--location", "Sydney"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid location"));
}

#[test]
fn test_empty_history() {
    let dir = tempfile::tempdir().unwrap();
    stagewatch(&dir)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs recorded yet."));
}
