//! End-to-end scenarios against the full Axum router (§8 concrete scenarios).

use axum::body::Body;
use axum::http::{Request, StatusCode};
use observe_sidecar::buffers::IngestionBuffers;
use observe_sidecar::checkpoint::CheckpointEngine;
use observe_sidecar::config::AppConfig;
use observe_sidecar::perf::PerformanceStore;
use observe_sidecar::{app, AppState, Metrics};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_state() -> AppState {
    AppState {
        buffers: Arc::new(IngestionBuffers::new(500, 500)),
        perf: Arc::new(PerformanceStore::new()),
        checkpoints: Arc::new(CheckpointEngine::new()),
        config: Arc::new(AppConfig {
            port: 0,
            network_cap: 500,
            websocket_cap: 500,
            max_request_bytes: None,
            log_file: None,
            extension_token: None,
        }),
        metrics: Arc::new(Metrics::new()),
    }
}

async fn post(router: &axum::Router, uri: &str, body: Value) -> Value {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK, "POST {uri} did not return 200");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn rpc_call(router: &axum::Router, name: &str, arguments: Value) -> Value {
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    });
    post(router, "/rpc", body).await
}

#[tokio::test]
async fn empty_server_is_clean() {
    let router = app(test_state());
    let resp = rpc_call(&router, "observe.changes_since", json!({})).await;
    let result = &resp["result"];
    assert_eq!(result["severity"], "clean");
    assert_eq!(result["summary"], "No significant changes.");
    assert!(result.get("console").is_none());
    assert!(result.get("network").is_none());
}

#[tokio::test]
async fn dedups_five_console_errors_into_one_group() {
    let router = app(test_state());
    let entries: Vec<Value> = (0..5)
        .map(|i| {
            json!({
                "level": "error",
                "message": format!("Error loading user {:08x}-0000-4000-8000-{:012x}", i, i)
            })
        })
        .collect();
    post(&router, "/console-logs", json!({ "entries": entries })).await;

    let resp = rpc_call(&router, "observe.changes_since", json!({})).await;
    let console = &resp["result"]["console"];
    assert_eq!(console["errors"].as_array().unwrap().len(), 1);
    assert_eq!(console["errors"][0]["count"], 5);
    assert_eq!(console["total_new"], 5);
}

#[tokio::test]
async fn network_failure_detection_flags_status_regression() {
    let router = app(test_state());
    post(
        &router,
        "/network-bodies",
        json!({ "bodies": [{
            "method": "GET",
            "url": "https://x.test/api/users",
            "status": 200,
            "duration_ms": 40.0
        }] }),
    )
    .await;

    // take the auto-checkpoint
    let baseline = rpc_call(&router, "observe.changes_since", json!({})).await;
    assert_eq!(baseline["result"]["severity"], "clean");

    post(
        &router,
        "/network-bodies",
        json!({ "bodies": [{
            "method": "GET",
            "url": "https://x.test/api/users?page=2",
            "status": 500,
            "duration_ms": 40.0
        }] }),
    )
    .await;

    let resp = rpc_call(&router, "observe.changes_since", json!({})).await;
    let network = &resp["result"]["network"];
    let failures = network["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["path"], "/api/users");
    assert_eq!(failures[0]["status"], 500);
    assert_eq!(failures[0]["previous_status"], 200);
    assert_eq!(resp["result"]["severity"], "error");
}

#[tokio::test]
async fn websocket_disconnection_is_a_warning() {
    let router = app(test_state());
    post(
        &router,
        "/websocket-events",
        json!({ "events": [{
            "event": "close",
            "id": "ws-1",
            "url": "wss://chat/ws",
            "close_code": 1006
        }] }),
    )
    .await;

    let resp = rpc_call(&router, "observe.changes_since", json!({})).await;
    assert_eq!(resp["result"]["severity"], "warning");
    let disconnections = resp["result"]["websocket"]["disconnections"]
        .as_array()
        .unwrap();
    assert_eq!(disconnections.len(), 1);
    assert_eq!(disconnections[0]["close_code"], 1006);
}

fn snapshot_body(load: f64) -> Value {
    json!({
        "url": "https://x.test/page",
        "timestamp": "2024-01-01T00:00:00Z",
        "timing": {
            "load": load,
            "dom_content_loaded": load * 0.5,
            "dom_interactive": load * 0.4,
            "time_to_first_byte": 100.0
        },
        "network": { "request_count": 5, "transfer_size": 50000, "decoded_size": 50000 },
        "long_tasks": { "count": 0, "total_blocking_time": 0.0, "longest": 0.0 }
    })
}

#[tokio::test]
async fn load_time_regression_raises_one_pending_alert() {
    let router = app(test_state());
    post(&router, "/performance-snapshot", snapshot_body(1000.0)).await;
    post(&router, "/performance-snapshot", snapshot_body(1300.0)).await;

    let resp = rpc_call(&router, "observe.changes_since", json!({})).await;
    let alerts = resp["result"]["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["type"], "regression");
    let delta_ms = alerts[0]["metrics"]["load"]["delta_ms"].as_f64().unwrap();
    assert_eq!(delta_ms, 300.0);
    let delta_pct = alerts[0]["metrics"]["load"]["delta_pct"].as_f64().unwrap();
    assert!((29.0..=31.0).contains(&delta_pct));
    assert!(alerts[0]["metrics"].get("fcp").is_none());
    assert!(alerts[0]["metrics"].get("ttfb").is_none());
}

#[tokio::test]
async fn causal_diff_flags_added_render_blocking_script() {
    let router = app(test_state());
    let mut baseline = snapshot_body(1000.0);
    baseline["resources"] = json!([{
        "url": "https://x.test/a.js",
        "type": "script",
        "transfer_size": 100 * 1024,
        "duration": 50.0,
        "render_blocking": false
    }]);
    post(&router, "/performance-snapshot", baseline).await;

    let mut current = snapshot_body(1000.0);
    current["resources"] = json!([
        {
            "url": "https://x.test/a.js",
            "type": "script",
            "transfer_size": 100 * 1024,
            "duration": 50.0,
            "render_blocking": false
        },
        {
            "url": "https://x.test/b.js",
            "type": "script",
            "transfer_size": 200 * 1024,
            "duration": 60.0,
            "render_blocking": true
        }
    ]);
    post(&router, "/performance-snapshot", current).await;

    let resp = rpc_call(&router, "analyze.causal_diff", json!({})).await;
    let result = &resp["result"];
    let added = result["resource_changes"]["added"].as_array().unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0]["url"], "https://x.test/b.js");
    let cause = result["probable_cause"].as_str().unwrap();
    assert!(cause.contains("Added 200.0KB"));
    assert!(cause.contains("render-blocking"));
    let recs = result["recommendations"].as_array().unwrap();
    assert!(recs.iter().any(|r| r.as_str().unwrap().contains("Lazy-load")));
}

#[tokio::test]
async fn malformed_enhanced_actions_json_is_rejected() {
    let router = app(test_state());
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/enhanced-actions")
                .header("content-type", "application/json")
                .body(Body::from("{not valid"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_rpc_method_returns_structured_error() {
    let router = app(test_state());
    let body = json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/list",
        "params": {}
    });
    let resp = post(&router, "/rpc", body).await;
    assert_eq!(resp["id"], 7);
    assert!(resp.get("result").is_none());
    assert!(resp["error"]["code"].is_number());
}
