//! End-to-end CLI tests for the harvester binary.

use assert_cmd::Command;
use predicates::prelude::*;

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("discover"))
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("extract"));
}

/// Test that --version prints the crate version.
#[test]
fn test_binary_version_flag() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

/// Invoking without a subcommand is a usage error.
#[test]
fn test_binary_requires_subcommand() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

/// An unknown flag is rejected with a non-zero exit.
#[test]
fn test_binary_rejects_unknown_flag() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.args(["discover", "--no-such-flag"]).assert().failure();
}

/// An out-of-range concurrency value is rejected before any work starts.
#[test]
fn test_binary_rejects_invalid_concurrency() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.args(["download", "-c", "0"]).assert().failure();
}

/// Running a stage before the stage that feeds it fails with a hint.
#[test]
fn test_extract_before_download_fails_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.args(["--data-dir"])
        .arg(dir.path())
        .arg("extract")
        .assert()
        .failure()
        .stderr(predicate::str::contains("download"));
}

/// A full run where every download fails exits non-zero, same as the
/// standalone download command.
#[tokio::test(flavor = "multi_thread")]
async fn test_run_with_all_downloads_failing_exits_nonzero() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data-set-1-files"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><a href="/files/gone.pdf">gone</a></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/gone.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let base_url = server.uri();
    let assert = tokio::task::spawn_blocking(move || {
        let mut cmd = Command::cargo_bin("harvester").unwrap();
        cmd.args(["--data-dir"])
            .arg(dir.path())
            .args(["--base-url", &base_url, "--datasets", "1", "run"])
            .assert()
    })
    .await
    .unwrap();
    assert
        .failure()
        .stderr(predicate::str::contains("every download in the batch failed"));
}

/// Same for download before discovery.
#[test]
fn test_download_before_discover_fails_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.args(["--data-dir"])
        .arg(dir.path())
        .arg("download")
        .assert()
        .failure()
        .stderr(predicate::str::contains("discover"));
}
