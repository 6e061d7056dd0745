//! CLI integration tests for the kvkeeper binary.
//!
//! These tests verify help output, argument parsing and config validation.
//! None of them leave a server running: every invocation exits before the
//! listener is bound.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a command for the kvkeeper binary.
fn kvkeeper() -> Command {
    Command::cargo_bin("kvkeeper").unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_displays() {
    kvkeeper()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("kvkeeper"))
        .stdout(predicate::str::contains("key-value"));
}

#[test]
fn test_version_displays() {
    kvkeeper()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("kvkeeper"));
}

#[test]
fn test_help_lists_flags() {
    kvkeeper()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("--log-dir"))
        .stdout(predicate::str::contains("--host"))
        .stdout(predicate::str::contains("--port"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument Validation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_port_rejected() {
    kvkeeper()
        .args(["--port", "not-a-port"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_unknown_flag_rejected() {
    kvkeeper()
        .arg("--frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unexpected argument"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Validation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_duplicate_backends_rejected() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        "backends:\n  - endpoints: 127.0.0.1:2379\n    name: a\n  - endpoints: 127.0.0.1:2379\n    name: b"
    )
    .unwrap();

    kvkeeper()
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate backend endpoints"));
}

#[test]
fn test_malformed_toml_rejected() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "port = [").unwrap();

    kvkeeper()
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn test_invalid_host_rejected() {
    let dir = tempfile::tempdir().unwrap();

    kvkeeper()
        .arg("--config")
        .arg(dir.path().join("missing.yaml"))
        .args(["--host", "not a host"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid listen address"));
}
