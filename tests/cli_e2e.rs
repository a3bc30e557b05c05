//! End-to-end CLI tests for the docmirror binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("docmirror").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mirror a documentation site"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("docmirror").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("docmirror"));
}

/// Test that a missing seed URL causes non-zero exit.
#[test]
fn test_binary_missing_seed_returns_error() {
    let mut cmd = Command::cargo_bin("docmirror").unwrap();
    cmd.args(["--doc", "example"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

/// Test that an out-of-range worker count is rejected before crawling.
#[test]
fn test_binary_invalid_workers_returns_error() {
    let mut cmd = Command::cargo_bin("docmirror").unwrap();
    cmd.args(["https://docs.example.com/", "--doc", "example", "-w", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("0"));
}

/// Test that an unparsable seed URL fails the run.
#[test]
fn test_binary_invalid_seed_returns_error() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("docmirror").unwrap();
    cmd.args(["not a url", "--doc", "example", "-q", "-o"])
        .arg(dir.path())
        .assert()
        .failure();
}

/// Test that a crawl of a one-page site prints the summary as JSON.
#[tokio::test]
async fn test_binary_crawl_prints_summary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/docs/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html><body>hello</body></html>", "text/html"),
        )
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let seed = format!("{}/docs/", server.uri());

    let output = tokio::task::spawn_blocking({
        let root = dir.path().to_path_buf();
        move || {
            Command::cargo_bin("docmirror")
                .unwrap()
                .args([seed.as_str(), "--doc", "example", "--doc-version", "1.0", "--no-sitemap"])
                .args(["-l", "5"])
                .arg("-o")
                .arg(root)
                .env("RUST_LOG", "error")
                .output()
                .unwrap()
        }
    })
    .await
    .unwrap();

    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["pages_changed"], 1);
    assert!(
        dir.path()
            .join("docs/example/1.0/docs/index.html")
            .exists()
    );
}
