//! End-to-end tests for the `dbachat` binary

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

fn dbachat(state_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("dbachat").expect("binary is built");
    cmd.env_remove("DBACHAT_SERVER_URL")
        .env_remove("RUST_LOG")
        .env("DBACHAT_STATE_DIR", state_dir);
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = tempfile::TempDir::new().unwrap();
    dbachat(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("databases"))
        .stdout(predicate::str::contains("describe"));
}

#[test]
fn test_chat_help_shows_overrides() {
    let dir = tempfile::TempDir::new().unwrap();
    dbachat(dir.path())
        .args(["chat", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--database"))
        .stdout(predicate::str::contains("--role"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let (_config_dir, config_path) = common::temp_config_file(
        r#"
server:
  base_url: "http://localhost:8888"
  ws_path: "ws"
"#,
    );

    dbachat(dir.path())
        .args(["--config", config_path.to_str().unwrap(), "databases"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ws_path"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_databases_json_against_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/databases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "databases": [{"name": "Sales", "description": "orders"}, "Inventory"]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        dbachat(dir.path())
            .args(["--server", uri.as_str(), "databases", "--json"])
            .output()
            .expect("run dbachat")
    })
    .await
    .unwrap();

    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        parsed,
        json!([
            {"name": "Sales", "description": "orders"},
            {"name": "Inventory", "description": ""}
        ])
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_describe_saves_trimmed_text() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/databases/Sales/description"))
        .and(body_json(json!({"description": "Orders and invoices"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        dbachat(dir.path())
            .args(["--server", uri.as_str(), "describe", "Sales", "  Orders and invoices "])
            .output()
            .expect("run dbachat")
    })
    .await
    .unwrap();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Saved description of Sales"));
}
