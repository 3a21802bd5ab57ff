//! JSON-RPC 2.0 tool-call envelope and dispatcher (§6).
//!
//! Deliberately thin: each tool method pulls what it needs from the core
//! components and hands back a JSON value. No business logic lives here —
//! that is the point of the tool facade (§2, "thin request -> call ->
//! response; no business logic").

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::causal;
use crate::error::{CoreError, ErrorBody};
use crate::types::ChangesSinceParams;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, error: ErrorBody) -> Self {
        JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Entry point for `POST /rpc`. Only `method == "tools/call"` is supported;
/// anything else is an `InvalidParam` error per §7.
pub async fn dispatch(state: &AppState, request: JsonRpcRequest) -> JsonRpcResponse {
    if request.method != "tools/call" {
        let err = CoreError::InvalidParam(format!("unknown method '{}'", request.method));
        return JsonRpcResponse::err(request.id, ErrorBody::from(&err));
    }

    let call: ToolCallParams = match serde_json::from_value(request.params) {
        Ok(c) => c,
        Err(e) => {
            let err = CoreError::InvalidParam(format!("malformed tools/call params: {e}"));
            return JsonRpcResponse::err(request.id, ErrorBody::from(&err));
        }
    };

    match call_tool(state, &call.name, call.arguments).await {
        Ok(result) => JsonRpcResponse::ok(request.id, result),
        Err(err) => JsonRpcResponse::err(request.id, ErrorBody::from(&err)),
    }
}

async fn call_tool(state: &AppState, name: &str, arguments: Value) -> Result<Value, CoreError> {
    match name {
        "observe.changes_since" => tool_changes_since(state, arguments),
        "observe.create_checkpoint" => tool_create_checkpoint(state, arguments),
        "analyze.performance" => tool_analyze_performance(state, arguments),
        "analyze.causal_diff" => tool_causal_diff(state, arguments),
        "analyze.web_vitals" => tool_web_vitals(state),
        other => Err(CoreError::InvalidParam(format!("unknown tool '{other}'"))),
    }
}

fn tool_changes_since(state: &AppState, arguments: Value) -> Result<Value, CoreError> {
    let params: ChangesSinceParams = if arguments.is_null() {
        ChangesSinceParams {
            checkpoint: None,
            include: None,
            severity: None,
        }
    } else {
        serde_json::from_value(arguments)
            .map_err(|e| CoreError::InvalidParam(format!("bad changes_since arguments: {e}")))?
    };
    let response = state.checkpoints.get_changes_since(&params, &state.buffers);
    serde_json::to_value(response)
        .map_err(|e| CoreError::InvalidParam(format!("failed to serialize response: {e}")))
}

#[derive(Debug, Deserialize)]
struct CreateCheckpointArgs {
    name: String,
}

fn tool_create_checkpoint(state: &AppState, arguments: Value) -> Result<Value, CoreError> {
    let args: CreateCheckpointArgs = serde_json::from_value(arguments)
        .map_err(|e| CoreError::InvalidParam(format!("bad create_checkpoint arguments: {e}")))?;
    state.checkpoints.create_checkpoint(&args.name, &state.buffers)?;
    state
        .metrics
        .checkpoints_created
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    Ok(json!({ "status": "ok", "name": args.name }))
}

#[derive(Debug, Default, Deserialize)]
struct UrlArgs {
    #[serde(default)]
    url: Option<String>,
}

fn resolve_url(state: &AppState, explicit: Option<String>) -> Option<String> {
    explicit.or_else(|| state.perf.latest_snapshot().map(|s| s.url))
}

fn tool_analyze_performance(state: &AppState, arguments: Value) -> Result<Value, CoreError> {
    let args: UrlArgs = if arguments.is_null() {
        UrlArgs::default()
    } else {
        serde_json::from_value(arguments)
            .map_err(|e| CoreError::InvalidParam(format!("bad analyze.performance arguments: {e}")))?
    };
    let url = resolve_url(state, args.url)
        .ok_or_else(|| CoreError::NoData("no performance snapshots recorded yet".to_string()))?;
    let snapshot = state
        .perf
        .snapshot(&url)
        .ok_or_else(|| CoreError::NoData(format!("no snapshot recorded for {url}")))?;
    let baseline = state
        .perf
        .baseline(&url)
        .ok_or_else(|| CoreError::NoData(format!("no baseline recorded for {url}")))?;

    let report = render_performance_report(&url, &snapshot, &baseline);
    Ok(json!({ "markdown": report }))
}

fn render_performance_report(
    url: &str,
    snapshot: &crate::types::PerformanceSnapshot,
    baseline: &crate::types::PerformanceBaseline,
) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    let _ = writeln!(out, "# Performance report for {url}");
    let _ = writeln!(out, "\nBaseline from {} samples.\n", baseline.sample_count);
    let _ = writeln!(out, "| Metric | Baseline | Current |");
    let _ = writeln!(out, "|---|---|---|");
    let _ = writeln!(
        out,
        "| Load | {:.0}ms | {:.0}ms |",
        baseline.timing.load, snapshot.timing.load
    );
    let _ = writeln!(
        out,
        "| TTFB | {:.0}ms | {:.0}ms |",
        baseline.timing.time_to_first_byte, snapshot.timing.time_to_first_byte
    );
    if let (Some(b), Some(c)) = (
        baseline.timing.first_contentful_paint,
        snapshot.timing.first_contentful_paint,
    ) {
        let _ = writeln!(out, "| FCP | {b:.0}ms | {c:.0}ms |");
    }
    if let (Some(b), Some(c)) = (
        baseline.timing.largest_contentful_paint,
        snapshot.timing.largest_contentful_paint,
    ) {
        let _ = writeln!(out, "| LCP | {b:.0}ms | {c:.0}ms |");
    }
    let _ = writeln!(
        out,
        "| Transfer size | {} | {} |",
        crate::fingerprint::format_bytes(baseline.network.transfer_size),
        crate::fingerprint::format_bytes(snapshot.network.transfer_size)
    );
    out
}

#[derive(Debug, Default, Deserialize)]
struct CausalDiffArgs {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    baseline_id: Option<String>,
}

fn tool_causal_diff(state: &AppState, arguments: Value) -> Result<Value, CoreError> {
    let args: CausalDiffArgs = if arguments.is_null() {
        CausalDiffArgs::default()
    } else {
        serde_json::from_value(arguments)
            .map_err(|e| CoreError::InvalidParam(format!("bad causal_diff arguments: {e}")))?
    };
    let url = resolve_url(state, args.url)
        .ok_or_else(|| CoreError::NoData("no performance snapshots recorded yet".to_string()))?;
    let snapshot = state
        .perf
        .snapshot(&url)
        .ok_or_else(|| CoreError::NoData(format!("no snapshot recorded for {url}")))?;
    let baseline = state
        .perf
        .baseline(&url)
        .ok_or_else(|| CoreError::NoData(format!("no baseline recorded for {url}")))?;

    let result = causal::causal_diff(&snapshot, &baseline);
    serde_json::to_value(result)
        .map_err(|e| CoreError::InvalidParam(format!("failed to serialize causal diff: {e}")))
}

#[derive(Debug, Serialize)]
struct VitalAssessment {
    value: f64,
    band: &'static str,
}

fn band(value: f64, good_max: f64, needs_improvement_max: f64) -> &'static str {
    if value <= good_max {
        "good"
    } else if value <= needs_improvement_max {
        "needs-improvement"
    } else {
        "poor"
    }
}

fn tool_web_vitals(state: &AppState) -> Result<Value, CoreError> {
    let snapshot = state
        .perf
        .latest_snapshot()
        .ok_or_else(|| CoreError::NoData("no performance snapshots recorded yet".to_string()))?;

    let mut out = serde_json::Map::new();
    out.insert("url".to_string(), json!(snapshot.url));
    out.insert("load_ms".to_string(), json!(snapshot.timing.load));

    if let Some(fcp) = snapshot.timing.first_contentful_paint {
        out.insert(
            "fcp".to_string(),
            json!(VitalAssessment {
                value: fcp,
                band: band(fcp, 1800.0, 3000.0),
            }),
        );
    }
    if let Some(lcp) = snapshot.timing.largest_contentful_paint {
        out.insert(
            "lcp".to_string(),
            json!(VitalAssessment {
                value: lcp,
                band: band(lcp, 2500.0, 4000.0),
            }),
        );
    }
    if let Some(cls) = snapshot.cls {
        out.insert(
            "cls".to_string(),
            json!(VitalAssessment {
                value: cls,
                band: band(cls, 0.1, 0.25),
            }),
        );
    }
    if let Some(inp) = snapshot.timing.interaction_to_next_paint {
        out.insert(
            "inp".to_string(),
            json!(VitalAssessment {
                value: inp,
                band: band(inp, 200.0, 500.0),
            }),
        );
    }

    Ok(Value::Object(out))
}
