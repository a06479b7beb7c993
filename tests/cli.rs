//! Integration tests for CLI commands

#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Run the binary with its config directory inside `home`
fn redmoon(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("redmoon").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let tmp = TempDir::new().unwrap();
    redmoon(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("models"))
        .stdout(predicate::str::contains("chat"));
}

#[test]
fn test_models_json_format() {
    let tmp = TempDir::new().unwrap();
    redmoon(&tmp)
        .args(["models", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"chat_models\""))
        .stdout(predicate::str::contains("\"flux-schnell\""))
        .stdout(predicate::str::contains("backend").not());
}

#[test]
fn test_models_table_format() {
    let tmp = TempDir::new().unwrap();
    redmoon(&tmp)
        .arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("Flux Schnell"))
        .stdout(predicate::str::contains("web search"));
}

#[test]
fn test_models_rejects_unknown_format() {
    let tmp = TempDir::new().unwrap();
    redmoon(&tmp)
        .args(["models", "--format", "yaml"])
        .assert()
        .failure();
}

#[test]
fn test_chat_menu_over_stdin() {
    let tmp = TempDir::new().unwrap();
    redmoon(&tmp)
        .arg("chat")
        .write_stdin("1\nhello there\nexit\n0\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("you said"))
        .stdout(predicate::str::contains("hello there"))
        .stdout(predicate::str::contains("Goodbye!"));
}

#[cfg(target_os = "linux")]
#[test]
fn test_config_init_does_not_overwrite() {
    let tmp = TempDir::new().unwrap();
    redmoon(&tmp)
        .args(["config", "--init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default config"));
    assert!(tmp.path().join(".config/redmoon/config.toml").exists());

    redmoon(&tmp)
        .args(["config", "--init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));

    redmoon(&tmp)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("flux-schnell"));
}
