//! Fast CLI tests using assert_cmd.
//! These exercise the binary's argument surface without a container runtime.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_flag() {
    Command::cargo_bin("dcsandbox")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("development sandboxes"));
}

#[test]
fn test_version_flag() {
    Command::cargo_bin("dcsandbox")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn test_subcommand_help() {
    for subcmd in &[
        "create", "list", "info", "start", "stop", "remove", "cleanup", "logs",
    ] {
        Command::cargo_bin("dcsandbox")
            .unwrap()
            .args([subcmd, "--help"])
            .assert()
            .success()
            .stdout(predicate::str::is_empty().not());
    }
}

#[test]
fn test_create_help_lists_spec_flags() {
    Command::cargo_bin("dcsandbox")
        .unwrap()
        .args(["create", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--git")
                .and(predicate::str::contains("--branch"))
                .and(predicate::str::contains("--memory"))
                .and(predicate::str::contains("--cpu"))
                .and(predicate::str::contains("--timeout"))
                .and(predicate::str::contains("--persist"))
                .and(predicate::str::contains("--auto-detect")),
        );
}

#[test]
fn test_unknown_subcommand_fails() {
    Command::cargo_bin("dcsandbox")
        .unwrap()
        .arg("frobnicate")
        .assert()
        .failure();
}

#[test]
fn test_logs_tail_defaults_to_100() {
    Command::cargo_bin("dcsandbox")
        .unwrap()
        .args(["logs", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("100"));
}

#[test]
fn test_missing_required_argument_fails() {
    Command::cargo_bin("dcsandbox")
        .unwrap()
        .arg("info")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SANDBOX"));
}
