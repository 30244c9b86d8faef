//! End-to-end CLI tests for the language101 binary.

use assert_cmd::Command;
use language101_core::{DownloadStack, StackStore};
use predicates::prelude::*;
use tempfile::TempDir;

/// Runs the binary with an isolated config directory and no credentials.
fn isolated(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("language101").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG")
        .env_remove("LANGUAGE101_USERNAME")
        .env_remove("LANGUAGE101_PASSWORD")
        .env("LANGUAGE101_MASTER_KEY", "e2e-test-key");
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("language101").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Archive a whole Innovative Language course"))
        .stdout(predicate::str::contains("--no-flashcards"));
}

#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("language101").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("language101"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("language101").unwrap();
    cmd.arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_library_root_url_exits_non_zero() {
    let config_home = TempDir::new().unwrap();
    isolated(&config_home)
        .args(["--url", "https://www.japanesepod101.com/lesson-library"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("lesson library root"));
}

#[test]
fn test_unrecognized_url_exits_non_zero() {
    let config_home = TempDir::new().unwrap();
    isolated(&config_home)
        .args(["--url", "https://www.japanesepod101.com/about-us"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a lesson-library"));
}

#[test]
fn test_no_url_and_no_stack_exits_non_zero() {
    let config_home = TempDir::new().unwrap();
    isolated(&config_home)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No download in progress"));
}

#[test]
fn test_invalid_config_file_reports_key_and_line() {
    let config_home = TempDir::new().unwrap();
    let config_dir = config_home.path().join("language101");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "# settings\nflashcards = maybe\n",
    )
    .unwrap();

    isolated(&config_home)
        .assert()
        .failure()
        .stderr(predicate::str::contains("flashcards"))
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn test_unknown_language_exits_non_zero() {
    let config_home = TempDir::new().unwrap();
    isolated(&config_home)
        .args(["--language", "klingon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("klingon"));
}

#[tokio::test]
async fn test_finished_stack_is_cleared_without_logging_in() {
    let config_home = TempDir::new().unwrap();
    let db_path = config_home.path().join("language101").join("stack.db");
    std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();

    let store = StackStore::open(&db_path).await.unwrap();
    let mut stack =
        DownloadStack::new("https://www.japanesepod101.com/lesson-library/absolute-beginner");
    stack.push("https://www.japanesepod101.com/lesson/one", "absolute-beginner");
    stack.push("https://www.japanesepod101.com/lesson/two", "absolute-beginner");
    stack.mark_completed(0);
    stack.mark_completed(1);
    store.save(&stack).await.unwrap();
    store.close().await;

    // No credentials and no session file: any login attempt would fail.
    isolated(&config_home).assert().success();

    let store = StackStore::open(&db_path).await.unwrap();
    assert!(store.load().await.unwrap().is_none());
}
