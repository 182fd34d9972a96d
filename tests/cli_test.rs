#![allow(deprecated)]

//! Binary-level tests for the `cliniq` CLI
use assert_cmd::Command;
use predicates::prelude::*;
mod common;

#[test]
fn test_help_lists_commands() {
    let mut cmd = Command::cargo_bin("cliniq").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("history"));
}

#[test]
fn test_history_of_empty_conversation() {
    let (_dir, store) = common::temp_store_dir();

    let mut cmd = Command::cargo_bin("cliniq").unwrap();
    cmd.arg("--store")
        .arg(&store)
        .arg("history")
        .arg("--conversation")
        .arg("c1");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No threads found"));
}

#[test]
fn test_history_json_of_empty_conversation() {
    let (_dir, store) = common::temp_store_dir();

    let mut cmd = Command::cargo_bin("cliniq").unwrap();
    cmd.arg("--store")
        .arg(&store)
        .arg("history")
        .arg("--conversation")
        .arg("c1")
        .arg("--json");

    cmd.assert().success().stdout(predicate::str::contains("[]"));
}

#[test]
fn test_invalid_endpoint_in_config_is_rejected() {
    let (_temp_dir, config_path) =
        common::temp_config_file("service:\n  endpoint: ftp://answers.example.org/stream\n");
    let (_dir, store) = common::temp_store_dir();

    let mut cmd = Command::cargo_bin("cliniq").unwrap();
    cmd.arg("--config")
        .arg(config_path)
        .arg("--store")
        .arg(&store)
        .arg("history")
        .arg("--conversation")
        .arg("c1");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("must use http or https"));
}

#[test]
fn test_zero_feedback_interval_is_rejected() {
    let (_temp_dir, config_path) =
        common::temp_config_file("feedback:\n  every_n_questions: 0\n");

    let mut cmd = Command::cargo_bin("cliniq").unwrap();
    cmd.arg("--config")
        .arg(config_path)
        .arg("history")
        .arg("--conversation")
        .arg("c1");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("must be greater than 0"));
}
