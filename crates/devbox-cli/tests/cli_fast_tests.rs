//! Fast CLI tests using assert_cmd.
//! These run the binary directly without needing a container engine.

#![allow(deprecated)] // assert_cmd::Command::cargo_bin is deprecated but works fine

use assert_cmd::Command;
use predicates::prelude::*;

/// A project whose engine socket does not exist
fn unreachable_project() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join(".devbox")).unwrap();
    std::fs::write(
        tmp.path().join(".devbox/devbox.toml"),
        "[engine]\nsocket = \"/nonexistent/docker.sock\"\n",
    )
    .unwrap();
    std::fs::write(tmp.path().join("docker-compose.yml"), "services: {}\n").unwrap();
    tmp
}

#[test]
fn test_help_flag() {
    Command::cargo_bin("devbox")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("SSH-ready Docker dev containers"));
}

#[test]
fn test_version_flag() {
    Command::cargo_bin("devbox")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("devbox"));
}

#[test]
fn test_subcommand_help() {
    for subcmd in &[
        "start", "stop", "connect", "rebuild", "status", "logs", "cleanup", "setup", "sync",
    ] {
        Command::cargo_bin("devbox")
            .unwrap()
            .args([subcmd, "--help"])
            .assert()
            .success()
            .stdout(predicate::str::is_empty().not());
    }
}

#[test]
fn test_unknown_subcommand_fails() {
    Command::cargo_bin("devbox")
        .unwrap()
        .arg("nonexistent-subcommand")
        .assert()
        .failure();
}

#[test]
fn test_missing_subcommand_fails() {
    Command::cargo_bin("devbox").unwrap().assert().failure();
}

#[test]
fn test_logs_rejects_bad_since() {
    Command::cargo_bin("devbox")
        .unwrap()
        .args(["logs", "--since", "garbage"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a timestamp or duration"));
}

#[test]
fn test_logs_rejects_overflowing_since() {
    Command::cargo_bin("devbox")
        .unwrap()
        .args(["logs", "--since", "300000000000000d"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a timestamp or duration"));
}

#[test]
fn test_start_help_lists_detach() {
    Command::cargo_bin("devbox")
        .unwrap()
        .args(["start", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--detach"));
}

#[test]
fn test_sync_editor_flag() {
    Command::cargo_bin("devbox")
        .unwrap()
        .args(["sync", "--editor", "cursor", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--editor"));

    Command::cargo_bin("devbox")
        .unwrap()
        .args(["sync", "--editor", "emacs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown editor: emacs"));
}

#[test]
fn test_status_with_engine_down_explains() {
    let project = unreachable_project();
    Command::cargo_bin("devbox")
        .unwrap()
        .arg("status")
        .current_dir(project.path())
        .env_remove("RUST_LOG")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Cannot connect to Docker"))
        .stderr(predicate::str::contains("To fix:"));
}

#[test]
fn test_project_dir_flag_is_honored() {
    let project = unreachable_project();
    let elsewhere = tempfile::tempdir().unwrap();
    Command::cargo_bin("devbox")
        .unwrap()
        .args(["--project-dir"])
        .arg(project.path())
        .arg("start")
        .current_dir(elsewhere.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Cannot connect to Docker"));
}

#[test]
fn test_invalid_config_fails_before_engine() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join(".devbox")).unwrap();
    std::fs::write(
        tmp.path().join(".devbox/devbox.toml"),
        "[ssh]\nport = \"not a port\"\n",
    )
    .unwrap();

    Command::cargo_bin("devbox")
        .unwrap()
        .arg("status")
        .current_dir(tmp.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("devbox.toml"));
}
