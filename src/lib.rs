//! Core library for the browser telemetry observability sidecar. Wires
//! together the ingestion buffers, performance store, checkpoint engine,
//! and JSON-RPC tool facade behind one Axum router. The core components
//! (buffers, checkpoint, perf, regression, causal, fingerprint) hold no
//! transport knowledge; this module is the only place that talks HTTP.

pub mod buffers;
pub mod causal;
pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod perf;
pub mod regression;
pub mod rpc;
pub mod types;

pub use config::AppConfig;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::buffers::IngestionBuffers;
use crate::checkpoint::CheckpointEngine;
use crate::error::{CoreError, ErrorBody};
use crate::perf::PerformanceStore;
use crate::rpc::JsonRpcRequest;
use crate::types::{
    ConsoleEntry, EnhancedAction, NetworkBody, PerformanceBaseline, PerformanceSnapshot,
    WebSocketEvent,
};

/// Shared application state handed to every Axum handler. Cheap to clone:
/// every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub buffers: Arc<IngestionBuffers>,
    pub perf: Arc<PerformanceStore>,
    pub checkpoints: Arc<CheckpointEngine>,
    pub config: Arc<AppConfig>,
    pub metrics: Arc<Metrics>,
}

/// Process-wide counters exposed on `/metrics`.
pub struct Metrics {
    pub console_ingested: AtomicU64,
    pub network_ingested: AtomicU64,
    pub websocket_ingested: AtomicU64,
    pub actions_ingested: AtomicU64,
    pub checkpoints_created: AtomicU64,
    pub rpc_requests_total: AtomicU64,
    pub rpc_errors_total: AtomicU64,
    pub process_start_instant: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            console_ingested: AtomicU64::new(0),
            network_ingested: AtomicU64::new(0),
            websocket_ingested: AtomicU64::new(0),
            actions_ingested: AtomicU64::new(0),
            checkpoints_created: AtomicU64::new(0),
            rpc_requests_total: AtomicU64::new(0),
            rpc_errors_total: AtomicU64::new(0),
            process_start_instant: Instant::now(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Build application state from environment variables (`OBSERVE_*`, see
/// `config.rs`).
pub async fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    let buffers = IngestionBuffers::new(config.network_cap, config.websocket_cap);
    Ok(AppState {
        buffers: Arc::new(buffers),
        perf: Arc::new(PerformanceStore::new()),
        checkpoints: Arc::new(CheckpointEngine::new()),
        config: Arc::new(config),
        metrics: Arc::new(Metrics::new()),
    })
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.config.max_request_bytes;

    let router = Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/enhanced-actions", post(ingest_actions_handler))
        .route("/console-logs", post(ingest_console_handler))
        .route("/network-bodies", post(ingest_network_handler))
        .route("/websocket-events", post(ingest_websocket_handler))
        .route(
            "/performance-snapshot",
            post(push_snapshot_handler)
                .get(get_snapshot_handler)
                .delete(reset_snapshot_handler),
        )
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http());

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

impl IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            CoreError::InvalidName | CoreError::InvalidParam(_) => StatusCode::BAD_REQUEST,
            CoreError::NoData(_) => StatusCode::NOT_FOUND,
        };
        let body = ErrorBody::from(&self);
        (status, Json(body)).into_response()
    }
}

/// Trust-on-first-use extension auth (§6, non-goals): when
/// `OBSERVE_EXTENSION_TOKEN` is set, ingestion endpoints require a matching
/// `Authorization: Bearer <token>` header. No pairing/handshake protocol —
/// that collaborator boundary is out of scope.
fn check_extension_token(state: &AppState, headers: &HeaderMap) -> Result<(), axum::response::Response> {
    let Some(expected) = state.config.extension_token.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected) {
        Ok(())
    } else {
        let err = CoreError::InvalidParam("missing or invalid extension token".to_string());
        Err((StatusCode::UNAUTHORIZED, Json(ErrorBody::from(&err))).into_response())
    }
}

#[derive(Debug, Deserialize)]
struct ActionsIngestBody {
    actions: Vec<EnhancedAction>,
}

async fn ingest_actions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ActionsIngestBody>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = check_extension_token(&state, &headers) {
        return resp;
    }
    let body = match payload {
        Ok(Json(b)) => b,
        Err(rejection) => return rejection.into_response(),
    };
    let n = body.actions.len() as u64;
    state.buffers.add_actions(body.actions);
    state.metrics.actions_ingested.fetch_add(n, Ordering::Relaxed);
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

#[derive(Debug, Deserialize)]
struct ConsoleIngestBody {
    entries: Vec<ConsoleEntry>,
}

async fn ingest_console_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ConsoleIngestBody>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = check_extension_token(&state, &headers) {
        return resp;
    }
    let body = match payload {
        Ok(Json(b)) => b,
        Err(rejection) => return rejection.into_response(),
    };
    let n = body.entries.len() as u64;
    state.buffers.add_console(body.entries);
    state.metrics.console_ingested.fetch_add(n, Ordering::Relaxed);
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

#[derive(Debug, Deserialize)]
struct NetworkIngestBody {
    bodies: Vec<NetworkBody>,
}

async fn ingest_network_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NetworkIngestBody>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = check_extension_token(&state, &headers) {
        return resp;
    }
    let body = match payload {
        Ok(Json(b)) => b,
        Err(rejection) => return rejection.into_response(),
    };
    let n = body.bodies.len() as u64;
    state.buffers.add_network(body.bodies);
    state.metrics.network_ingested.fetch_add(n, Ordering::Relaxed);
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

#[derive(Debug, Deserialize)]
struct WebSocketIngestBody {
    events: Vec<WebSocketEvent>,
}

async fn ingest_websocket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<WebSocketIngestBody>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = check_extension_token(&state, &headers) {
        return resp;
    }
    let body = match payload {
        Ok(Json(b)) => b,
        Err(rejection) => return rejection.into_response(),
    };
    let n = body.events.len() as u64;
    state.buffers.add_websocket(body.events);
    state
        .metrics
        .websocket_ingested
        .fetch_add(n, Ordering::Relaxed);
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

async fn push_snapshot_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PerformanceSnapshot>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = check_extension_token(&state, &headers) {
        return resp;
    }
    let snapshot = match payload {
        Ok(Json(s)) => s,
        Err(rejection) => return rejection.into_response(),
    };
    let baseline_before = state.perf.add_snapshot(snapshot.clone());
    state
        .checkpoints
        .detect_and_store_alerts(&snapshot, baseline_before.as_ref());
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

#[derive(Debug, Deserialize)]
struct UrlQuery {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct SnapshotResponse {
    snapshot: Option<PerformanceSnapshot>,
    baseline: Option<PerformanceBaseline>,
}

async fn get_snapshot_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UrlQuery>,
) -> axum::response::Response {
    if let Err(resp) = check_extension_token(&state, &headers) {
        return resp;
    }
    let url = query
        .url
        .or_else(|| state.perf.latest_snapshot().map(|s| s.url));
    let Some(url) = url else {
        let err = CoreError::NoData("no performance snapshots recorded yet".to_string());
        return err.into_response();
    };
    let snapshot = state.perf.snapshot(&url);
    let baseline = state.perf.baseline(&url);
    (StatusCode::OK, Json(SnapshotResponse { snapshot, baseline })).into_response()
}

async fn reset_snapshot_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(resp) = check_extension_token(&state, &headers) {
        return resp;
    }
    state.perf.reset();
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

async fn rpc_handler(
    State(state): State<AppState>,
    payload: Result<Json<JsonRpcRequest>, JsonRejection>,
) -> axum::response::Response {
    let request = match payload {
        Ok(Json(r)) => r,
        Err(rejection) => return rejection.into_response(),
    };
    state.metrics.rpc_requests_total.fetch_add(1, Ordering::Relaxed);
    let response = rpc::dispatch(&state, request).await;
    if response.is_error() {
        state.metrics.rpc_errors_total.fetch_add(1, Ordering::Relaxed);
    }
    (StatusCode::OK, Json(response)).into_response()
}

async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let body = serde_json::json!({
        "status": "ok",
        "console_ingested": state.metrics.console_ingested.load(Ordering::Relaxed),
        "network_ingested": state.metrics.network_ingested.load(Ordering::Relaxed),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// Prometheus-style metrics exposition: simple counters, text format.
async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    use std::fmt::Write as _;
    let mut buf = String::new();
    let m = &state.metrics;

    writeln!(&mut buf, "# HELP observe_console_ingested_total Console log entries ingested").ok();
    writeln!(&mut buf, "# TYPE observe_console_ingested_total counter").ok();
    writeln!(
        &mut buf,
        "observe_console_ingested_total {}",
        m.console_ingested.load(Ordering::Relaxed)
    )
    .ok();

    writeln!(&mut buf, "# HELP observe_network_ingested_total Network bodies ingested").ok();
    writeln!(&mut buf, "# TYPE observe_network_ingested_total counter").ok();
    writeln!(
        &mut buf,
        "observe_network_ingested_total {}",
        m.network_ingested.load(Ordering::Relaxed)
    )
    .ok();

    writeln!(&mut buf, "# HELP observe_websocket_ingested_total WebSocket events ingested").ok();
    writeln!(&mut buf, "# TYPE observe_websocket_ingested_total counter").ok();
    writeln!(
        &mut buf,
        "observe_websocket_ingested_total {}",
        m.websocket_ingested.load(Ordering::Relaxed)
    )
    .ok();

    writeln!(&mut buf, "# HELP observe_actions_ingested_total Enhanced actions ingested").ok();
    writeln!(&mut buf, "# TYPE observe_actions_ingested_total counter").ok();
    writeln!(
        &mut buf,
        "observe_actions_ingested_total {}",
        m.actions_ingested.load(Ordering::Relaxed)
    )
    .ok();

    writeln!(&mut buf, "# HELP observe_checkpoints_created_total Named checkpoints created").ok();
    writeln!(&mut buf, "# TYPE observe_checkpoints_created_total counter").ok();
    writeln!(
        &mut buf,
        "observe_checkpoints_created_total {}",
        m.checkpoints_created.load(Ordering::Relaxed)
    )
    .ok();

    writeln!(&mut buf, "# HELP observe_rpc_requests_total JSON-RPC tool calls handled").ok();
    writeln!(&mut buf, "# TYPE observe_rpc_requests_total counter").ok();
    writeln!(
        &mut buf,
        "observe_rpc_requests_total {}",
        m.rpc_requests_total.load(Ordering::Relaxed)
    )
    .ok();

    writeln!(&mut buf, "# HELP observe_rpc_errors_total JSON-RPC tool calls that returned an error").ok();
    writeln!(&mut buf, "# TYPE observe_rpc_errors_total counter").ok();
    writeln!(
        &mut buf,
        "observe_rpc_errors_total {}",
        m.rpc_errors_total.load(Ordering::Relaxed)
    )
    .ok();

    writeln!(
        &mut buf,
        "# HELP observe_process_uptime_seconds Process uptime in seconds\n# TYPE observe_process_uptime_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "observe_process_uptime_seconds {}",
        m.process_start_instant.elapsed().as_secs_f64()
    )
    .ok();

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buf,
    )
        .into_response()
}
