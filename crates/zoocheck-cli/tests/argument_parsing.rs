//! Command line tests that run the binary end to end.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn zoocheck() -> Command {
    let mut cmd = Command::cargo_bin("zoocheck").unwrap();
    cmd.arg("--no-color");
    cmd
}

// ============================================================================
// Help and Argument Errors
// ============================================================================

#[test]
fn version_flag_shows_version() {
    Command::cargo_bin("zoocheck")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("zoocheck"));
}

#[test]
fn no_command_shows_help() {
    Command::cargo_bin("zoocheck")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn unknown_scenario_is_rejected() {
    zoocheck()
        .args(["run", "--scenario", "divergence"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown scenario"));
}

#[test]
fn witness_conflicts_with_maybe() {
    zoocheck()
        .args(["oracle", "h.toml", "--maybe", "0", "--witness"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn scenarios_lists_names() {
    zoocheck()
        .arg("scenarios")
        .assert()
        .success()
        .stdout(predicate::str::contains("baseline-harness-long"))
        .stdout(predicate::str::contains("random-harness"));
}

#[test]
fn scenarios_json_is_an_array() {
    let output = zoocheck().args(["scenarios", "--json"]).output().unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value.as_array().map(Vec::len), Some(6));
}

#[test]
fn faults_prints_every_sequence() {
    let output = zoocheck()
        .args(["faults", "--rounds", "3", "--budget", "2", "--max-per-round", "2", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["arrangements"], 6);
    assert_eq!(value["counts"].as_array().map(Vec::len), Some(6));
}

#[test]
fn harnesses_counts_shape() {
    zoocheck()
        .args(["harnesses", "--requests", "1", "--phases", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("harnesses with 1 requests in 2 phases"));
}

#[test]
fn oracle_checks_observed_state() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("harness.toml");
    fs::write(
        &path,
        r#"
[[phases]]
kind = "unconditional_write"
node = 1
key = 0
value = 101

[[phases]]
kind = "empty"

[[phases]]
kind = "unconditional_write"
node = 2
key = 1
value = 302
"#,
    )
    .unwrap();
    let path = path.to_str().unwrap();

    zoocheck()
        .args(["oracle", path, "--executed", "0", "--maybe", "2", "--observed", "101,302"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 legal states"));

    zoocheck()
        .args(["oracle", path, "--executed", "0,2", "--observed", "0,302"])
        .assert()
        .failure();
}

#[test]
fn run_quick_batch_passes() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("zoocheck.toml");
    fs::write(
        &config,
        "[ensemble]\nbase_port = 41000\n\n[run]\nscenario = \"paper\"\nfaults = 1\n",
    )
    .unwrap();

    let output = zoocheck()
        .args(["run", "--quick", "--json", "--executions", "2", "--seed", "3", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["scenario"], "paper");
    assert_eq!(value["passed"], 2);
    assert_eq!(value["records"].as_array().map(Vec::len), Some(2));
}
