//! MCP server integration tests.
//!
//! Verifies tool registration, parameter validation (garde), error paths,
//! response serialization, and MCP protocol round-trips.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rmcp::model::CallToolRequestParams;
use rmcp::ServiceExt;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Mutex;

use trendstitch_mcp::server::TrendsServer;

mod common;
use common::{make_provider, today, SyntheticClient, TestClock};

// ─── Test Helpers ────────────────────────────────────────────────────────────

/// Create a `TrendsServer` over a synthetic query service and a temporary dataset root.
fn make_test_server() -> (TrendsServer, TempDir, Arc<AtomicU32>) {
    let tmp = TempDir::new().unwrap();
    let (client, calls) = SyntheticClient::new();
    let provider = make_provider(tmp.path(), client, TestClock::new(today()));
    let server = TrendsServer::new(Arc::new(Mutex::new(provider)));
    (server, tmp, calls)
}

/// Call one tool over an in-memory transport; returns `(is_error, text)`.
async fn call_tool(server: TrendsServer, name: &str, args: serde_json::Value) -> (bool, String) {
    let (server_tx, server_rx) = tokio::io::duplex(1 << 20);
    let (client_tx, client_rx) = tokio::io::duplex(1 << 20);

    let _server_handle =
        tokio::spawn(async move { server.serve((client_rx, server_tx)).await.unwrap() });

    let client: rmcp::service::RunningService<rmcp::service::RoleClient, _> =
        ().serve((server_rx, client_tx)).await.unwrap();

    let result = client
        .peer()
        .call_tool(CallToolRequestParams {
            meta: None,
            name: name.to_string().into(),
            arguments: Some(serde_json::from_value(args).unwrap()),
            task: None,
        })
        .await
        .unwrap();

    let text = result
        .content
        .first()
        .and_then(|c| c.raw.as_text())
        .map(|t| t.text.clone())
        .unwrap();
    let is_error = result.is_error.unwrap_or(false);

    client.cancel().await.unwrap();
    (is_error, text)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Category 1: Server Initialization
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn server_info_has_correct_metadata() {
    use rmcp::ServerHandler;

    let (server, _tmp, _calls) = make_test_server();
    let info = server.get_info();

    assert_eq!(info.server_info.name, "trendstitch-mcp");
    assert_eq!(info.server_info.version, "0.1.0");
    assert!(info.capabilities.tools.is_some());
    let instructions = info.instructions.unwrap();
    assert!(instructions.contains("build_database"));
    assert!(instructions.contains("acquire_daily_once"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tool_router_lists_all_six_tools() {
    let (server, _tmp, _calls) = make_test_server();

    let (server_tx, server_rx) = tokio::io::duplex(4096);
    let (client_tx, client_rx) = tokio::io::duplex(4096);

    let server_handle =
        tokio::spawn(async move { server.serve((client_rx, server_tx)).await.unwrap() });

    let client: rmcp::service::RunningService<rmcp::service::RoleClient, _> =
        ().serve((server_rx, client_tx)).await.unwrap();

    let tools = client.list_all_tools().await.unwrap();
    let tool_names: Vec<String> = tools.iter().map(|t| t.name.to_string()).collect();

    assert_eq!(tools.len(), 6, "Expected 6 tools, got: {tool_names:?}");
    for expected in [
        "acquire_daily_once",
        "build_database",
        "build_monthly_database",
        "get_daily_from_database",
        "get_monthly_from_database",
        "check_dataset_status",
    ] {
        assert!(
            tool_names.contains(&expected.to_string()),
            "Missing tool: {expected}"
        );
    }

    client.cancel().await.unwrap();
    drop(server_handle);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Category 2: Parameter Validation: Garde Rejection
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn acquire_rejects_reversed_years() {
    let (server, _tmp, calls) = make_test_server();

    let (is_error, text) = call_tool(
        server,
        "acquire_daily_once",
        json!({"term": "flu", "start_year": 2020, "stop_year": 2019}),
    )
    .await;

    assert!(is_error);
    assert!(
        text.contains("Validation error"),
        "Expected validation error, got: {text}"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn build_rejects_path_like_term() {
    let (server, _tmp, calls) = make_test_server();

    let (is_error, text) = call_tool(server, "build_database", json!({"term": "../etc"})).await;

    assert!(is_error);
    assert!(
        text.contains("Validation error"),
        "Expected validation error, got: {text}"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn build_rejects_malformed_geo() {
    let (server, _tmp, _calls) = make_test_server();

    let (is_error, text) = call_tool(
        server,
        "build_monthly_database",
        json!({"term": "flu", "geo": "United States"}),
    )
    .await;

    assert!(is_error);
    assert!(text.contains("Validation error"), "got: {text}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daily_read_rejects_reversed_optional_years() {
    let (server, _tmp, _calls) = make_test_server();

    let (is_error, text) = call_tool(
        server,
        "get_daily_from_database",
        json!({"term": "flu", "start_year": 2020, "stop_year": 2010}),
    )
    .await;

    assert!(is_error);
    assert!(text.contains("stop_year"), "got: {text}");
}

// ═══════════════════════════════════════════════════════════════════════════════
// Category 3: Missing Datasets Are Reported, Not Raised
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daily_read_of_missing_dataset_is_not_an_error() {
    let (server, _tmp, _calls) = make_test_server();

    let (is_error, text) =
        call_tool(server, "get_daily_from_database", json!({"term": "flu"})).await;

    assert!(!is_error, "unexpected error: {text}");
    let resp: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(resp["found"], false);
    assert_eq!(resp["dataset"], "0_flu_US");
    assert!(resp["summary"].as_str().unwrap().contains("No data found"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_of_missing_dataset() {
    let (server, _tmp, _calls) = make_test_server();

    let (is_error, text) = call_tool(
        server,
        "check_dataset_status",
        json!({"term": "flu", "geo": ""}),
    )
    .await;

    assert!(!is_error, "unexpected error: {text}");
    let resp: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(resp["exists"], false);
    assert_eq!(resp["dataset"], "0_flu_");
}

// ═══════════════════════════════════════════════════════════════════════════════
// Category 4: Round-Trips Through the Provider
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn acquire_returns_the_scaled_table() {
    let (server, _tmp, calls) = make_test_server();

    let (is_error, text) = call_tool(
        server,
        "acquire_daily_once",
        json!({"term": "flu", "start_year": 2019, "stop_year": 2019}),
    )
    .await;

    assert!(!is_error, "unexpected error: {text}");
    let resp: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(resp["rows"], 365);
    assert_eq!(resp["precision"], "high");
    assert_eq!(resp["api_requests"], 13);
    assert_eq!(resp["date_range"]["start"], "2019-01-01");
    let first = &resp["data"][0];
    assert_eq!(first["date"], "2019-01-01");
    assert_eq!(first["scaled"], 10.0);
    assert_eq!(calls.load(Ordering::SeqCst), 13);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn build_then_status_then_read() {
    let (server, _tmp, calls) = make_test_server();

    let (is_error, text) =
        call_tool(server.clone(), "build_database", json!({"term": "flu"})).await;
    assert!(!is_error, "unexpected error: {text}");
    let resp: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(resp["appended"], true);
    assert_eq!(resp["label"], "flu_03_15_2020");
    assert_eq!(resp["api_requests"], 3);

    let (_, text) = call_tool(server.clone(), "build_database", json!({"term": "flu"})).await;
    let resp: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(resp["appended"], false);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let (_, text) = call_tool(
        server.clone(),
        "check_dataset_status",
        json!({"term": "flu"}),
    )
    .await;
    let resp: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(resp["exists"], true);
    assert_eq!(resp["pulls"].as_array().unwrap().len(), 1);
    assert_eq!(resp["pulls"][0]["precision"], "low");
    assert_eq!(resp["uniform"], true);
    assert_eq!(resp["daily_range"]["end"], "2020-03-15");

    let (_, text) = call_tool(
        server,
        "get_monthly_from_database",
        json!({"term": "flu", "start_year": 2019, "stop_year": 2019}),
    )
    .await;
    let resp: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(resp["found"], true);
    assert_eq!(resp["rows"], 12);
    assert_eq!(resp["data"][11]["value"], 120.0);
}
