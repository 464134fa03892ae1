//! Binary-level tests: argument handling, exit codes and files on disk.

mod common;

use assert_cmd::cargo::cargo_bin_cmd;
use common::fixtures::{copy_fixture, fixture_path, read_csv};
use common::wiremock_helpers::{mount_failures, mount_page, page_with_tag};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;
use wiremock::MockServer;

/// Helper: get a Command for the methodfinder binary, run from `dir` so
/// no stray ./config/methodfinder.toml is picked up.
fn methodfinder(dir: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("methodfinder");
    cmd.current_dir(dir.path()).env_remove("METHODFINDER_API_TOKEN");
    cmd
}

/// Config with no retry delay so failing URLs do not slow the suite down.
fn write_fast_config(dir: &TempDir) -> std::path::PathBuf {
    let content = fs::read_to_string(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config").join("methodfinder.toml"),
    )
    .unwrap()
    .replace("\ndelay_ms = 1000", "\ndelay_ms = 0");
    let path = dir.path().join("fast.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_help_lists_subcommands() {
    let tmp = TempDir::new().unwrap();
    methodfinder(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("split"))
        .stdout(predicate::str::contains("detect"))
        .stdout(predicate::str::contains("correlate"))
        .stdout(predicate::str::contains("merge"));
}

#[test]
fn test_init_writes_config_once() {
    let tmp = TempDir::new().unwrap();
    methodfinder(&tmp)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created default configuration file"));
    assert!(tmp.path().join("config").join("methodfinder.toml").exists());

    methodfinder(&tmp)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    methodfinder(&tmp).args(["init", "--force"]).assert().success();
}

#[test]
fn test_split_writes_chunks() {
    let tmp = TempDir::new().unwrap();
    methodfinder(&tmp)
        .arg("split")
        .arg(fixture_path("csv/customers.csv"))
        .args(["--output-dir", "chunks", "--chunk-size", "1", "--prefix", "part"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Records Written: 4"));

    for i in 1..=4 {
        assert!(tmp.path().join("chunks").join(format!("part_{}.csv", i)).exists());
    }
    assert!(!tmp.path().join("chunks").join("part_5.csv").exists());
}

#[test]
fn test_split_missing_column_fails() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("in.csv"), "token,domains\nabc,a.com\n").unwrap();

    methodfinder(&tmp)
        .args(["split", "in.csv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("column 'url' not found"));
    assert!(!tmp.path().join("output").exists());
}

#[test]
fn test_zero_concurrency_rejected() {
    let tmp = TempDir::new().unwrap();
    methodfinder(&tmp)
        .args(["detect", "in.csv", "--concurrency", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Concurrency must be greater than 0"));
}

#[test]
fn test_missing_config_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    methodfinder(&tmp)
        .args(["--config", "nope.toml", "correlate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_export_without_token_fails() {
    let tmp = TempDir::new().unwrap();
    methodfinder(&tmp)
        .arg("export-tls")
        .assert()
        .failure()
        .stderr(predicate::str::contains("API token is not configured"));
}

#[test]
fn test_correlate_and_merge_commands() {
    let tmp = TempDir::new().unwrap();
    copy_fixture("csv/service_dicts_summary.csv", tmp.path(), "services.csv");
    copy_fixture("csv/tls_subscriptions.csv", tmp.path(), "tls.csv");
    copy_fixture("csv/detections.csv", tmp.path(), "detections.csv");

    methodfinder(&tmp)
        .args(["correlate", "--services", "services.csv", "--tls", "tls.csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rows Updated: 2"));

    methodfinder(&tmp)
        .args([
            "merge",
            "--detections",
            "detections.csv",
            "--services",
            "services.csv",
            "-o",
            "updated.csv",
            "--summary-json",
            "summary.json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rows Updated: 1"));

    let (_, rows) = read_csv(&tmp.path().join("updated.csv"));
    assert_eq!(rows[0][2], "DNSPattern");

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(tmp.path().join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["stage"], "merge");
    assert_eq!(summary["rows_updated"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_detect_command_end_to_end() {
    let server = MockServer::start().await;
    mount_page(&server, "/", &page_with_tag("key=abc&backend=true&backendVersion=WOVN.proxy_0.3.12", None)).await;
    mount_failures(&server, "/broken", 503, 100).await;

    let tmp = TempDir::new().unwrap();
    let config = write_fast_config(&tmp);
    fs::create_dir_all(tmp.path().join("in")).unwrap();
    fs::write(
        tmp.path().join("in").join("file_1.csv"),
        format!("token,url\nabc,{0}\nxyz,{0}/broken\n", server.uri()),
    )
    .unwrap();

    let mut cmd = methodfinder(&tmp);
    cmd.arg("--config")
        .arg(&config)
        .args(["detect", "in", "--output-dir", "out", "--errors", "--combined", "all.csv", "--log-file", "run.log"]);
    let assert = tokio::task::spawn_blocking(move || cmd.assert()).await.unwrap();
    assert.success().stdout(predicate::str::contains("Failed Requests: 1"));

    let (_, rows) = read_csv(&tmp.path().join("out").join("file_1.csv"));
    let abc = rows.iter().find(|r| r[0] == "abc").unwrap();
    assert_eq!(abc[2], "Proxy");
    assert_eq!(abc[3], "0.3.12");

    let (_, errors) = read_csv(&tmp.path().join("out").join("file_1_errors.csv"));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0][2], "RequestFailed");

    assert!(tmp.path().join("all.csv").exists());
    assert!(fs::read_to_string(tmp.path().join("run.log")).unwrap().contains("Loaded 2 rows"));
}
