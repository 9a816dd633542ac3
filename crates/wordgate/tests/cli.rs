//! End-to-end smoke tests for the `wordgated` binary's direct inspection
//! commands (daemon lifecycle is covered at the unit level in
//! `src/daemon.rs`, since spawning a real background process per test
//! would be slow and flaky here).

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// Writes a config pointing `storage.dir` at a fresh temp directory so
/// parallel tests never share capacity/state files, and returns both the
/// directory (kept alive for the test's duration) and the config path.
fn isolated_config() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let storage = dir.path().join("storage");
    let config_path = dir.path().join("wordgate.yml");
    let mut file = std::fs::File::create(&config_path).unwrap();
    writeln!(file, "storage:\n  dir: \"{}\"", storage.display()).unwrap();
    (dir, config_path)
}

/// `wordgated --config <path> --log-level error <args...>`. Pinning the
/// log level keeps startup logging off of stdout so assertions can check
/// exact command output.
fn wordgated(config_path: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("wordgated").unwrap();
    cmd.arg("--config").arg(config_path).args(["--log-level", "error"]).args(args);
    cmd
}

#[test]
fn help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("wordgated").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("daemon"))
        .stdout(predicate::str::contains("calendar"))
        .stdout(predicate::str::contains("capacity"));
}

#[test]
fn daemon_status_reports_not_running_with_no_pid_file() {
    let (_dir, config_path) = isolated_config();
    wordgated(&config_path, &["daemon", "status"]).assert().success().stdout(predicate::str::contains("not running"));
}

#[test]
fn capacity_show_on_empty_store_succeeds_with_no_output() {
    let (_dir, config_path) = isolated_config();
    wordgated(&config_path, &["capacity", "show"]).assert().success().stdout(predicate::str::is_empty());
}

#[test]
fn capacity_adjust_then_show_reflects_the_change() {
    let (_dir, config_path) = isolated_config();
    wordgated(&config_path, &["capacity", "adjust", "2026-02-02", "500"]).assert().success();
    wordgated(&config_path, &["capacity", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2026-02-02: 500/12000"));
}

#[test]
fn calendar_check_rejects_malformed_date() {
    let (_dir, config_path) = isolated_config();
    wordgated(&config_path, &["calendar", "check", "not-a-date"]).assert().failure();
}

#[test]
fn calendar_check_reports_weekend_as_non_business_day() {
    let (_dir, config_path) = isolated_config();
    wordgated(&config_path, &["calendar", "check", "2026-02-01"]) // Sunday
        .assert()
        .success()
        .stdout(predicate::str::contains("business day = false"));
}
