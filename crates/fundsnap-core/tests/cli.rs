//! CLI surface: subcommands and the 0/1 exit contract.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn fundsnap(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("fundsnap").unwrap();
    cmd.current_dir(dir)
        .env_remove("FUNDSNAP_CONFIG")
        .env_remove("FUNDSNAP_SNAPSHOT_PATH")
        .env_remove("FUNDSNAP_LOG_DIR")
        .env_remove("FUNDSNAP_PROJECT_ID")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path, extra: &str) -> std::path::PathBuf {
    let path = dir.join("fundsnap.toml");
    let body = format!(
        "snapshot_path = \"{}\"\n\n[logging]\ndir = \"{}\"\n\n{extra}",
        dir.join("daily_funding.parquet").display(),
        dir.join("logs").display(),
    );
    fs::write(&path, body).unwrap();
    path
}

fn read_logs(dir: &Path) -> String {
    fs::read_dir(dir.join("logs"))
        .unwrap()
        .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
        .collect()
}

#[test]
fn help_lists_both_modes() {
    let dir = TempDir::new().unwrap();
    fundsnap(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("full"))
        .stdout(predicate::str::contains("incremental"));
}

#[test]
fn unknown_subcommand_exits_one() {
    let dir = TempDir::new().unwrap();
    fundsnap(dir.path()).arg("rebuild").assert().code(1);
}

#[test]
fn missing_explicit_config_exits_one() {
    let dir = TempDir::new().unwrap();
    fundsnap(dir.path())
        .args(["incremental", "--config", "nope.toml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nope.toml"));
}

#[test]
fn missing_project_fails_before_touching_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    fundsnap(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("incremental")
        .assert()
        .code(1);

    assert!(!dir.path().join("daily_funding.parquet").exists());
    let logs = read_logs(dir.path());
    assert!(logs.contains("run aborted before sync"), "{logs}");
    assert!(logs.contains("warehouse.project_id"), "{logs}");
}

#[test]
fn missing_token_fails_full_run() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        "[warehouse]\nproject_id = \"analytics\"\ntoken_env = \"FUNDSNAP_TEST_TOKEN_UNSET\"\n",
    );

    fundsnap(dir.path())
        .env_remove("FUNDSNAP_TEST_TOKEN_UNSET")
        .args(["full", "--config"])
        .arg(&config)
        .assert()
        .code(1);

    assert!(read_logs(dir.path()).contains("FUNDSNAP_TEST_TOKEN_UNSET"));
}

#[test]
fn invalid_query_override_exits_one() {
    let dir = TempDir::new().unwrap();
    let sql = dir.path().join("custom.sql");
    fs::write(&sql, "SELECT 1 AS Count\n").unwrap();
    let config = write_config(
        dir.path(),
        &format!("[queries]\nincremental_path = \"{}\"\n", sql.display()),
    );

    fundsnap(dir.path())
        .args(["incremental", "--config"])
        .arg(&config)
        .assert()
        .code(1);

    assert!(read_logs(dir.path()).contains("@watermark"));
}
