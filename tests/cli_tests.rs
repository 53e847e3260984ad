//! CLI tests for zypperpkg
//!
//! These run the real binary with assert_cmd and only exercise paths that
//! do not depend on zypper being installed on the test host.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::Builder;

fn zypperpkg_cmd() -> Command {
    let mut cmd = Command::cargo_bin("zypperpkg").unwrap();
    cmd.env_remove("ZYPPERPKG_CONFIG")
        .env("NO_COLOR", "1")
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn test_help() {
    zypperpkg_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("call"))
        .stdout(predicate::str::contains("functions"))
        .stdout(predicate::str::contains("facts"));
}

#[test]
fn test_version() {
    zypperpkg_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_call_requires_function() {
    zypperpkg_cmd().arg("call").assert().failure().code(2);
}

#[test]
fn test_call_unknown_function() {
    zypperpkg_cmd()
        .args(["call", "nope.fn"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("'nope.fn' is not available"));
}

#[test]
fn test_call_unknown_function_json_error() {
    let output = zypperpkg_cmd()
        .args(["--output", "json", "call", "nope.fn"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));

    let err: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(err["type"], "error");
    assert_eq!(err["message"], "'nope.fn' is not available");
}

#[test]
fn test_broken_config_falls_back_to_defaults() {
    let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[zypper\nrefreshdb_force = ").unwrap();

    zypperpkg_cmd()
        .arg("-c")
        .arg(file.path())
        .args(["call", "nope.fn"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Warning: Failed to load config"));
}

#[test]
fn test_facts_json() {
    let output = zypperpkg_cmd()
        .args(["--output", "json", "facts"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let facts: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(facts.is_object());
}
