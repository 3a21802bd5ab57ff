//! Wire data model shared across components (§3).
//!
//! All JSON field names are `snake_case` per §6. Structures here are kept
//! deliberately permissive (optional fields default to `None`/empty) since
//! browser-side payloads are free-form and the core never rejects a batch
//! for missing optional data.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsoleEntry {
    pub level: String,
    #[serde(default, alias = "msg")]
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkBody {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub duration_ms: f64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub response_body: Option<String>,
}

impl NetworkBody {
    pub fn path(&self) -> String {
        crate::fingerprint::url_path(&self.url)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WebSocketEvent {
    Open {
        id: String,
        url: String,
    },
    Close {
        id: String,
        url: String,
        #[serde(default)]
        close_code: Option<i32>,
        #[serde(default)]
        close_reason: Option<String>,
    },
    Error {
        id: String,
        url: String,
        #[serde(default)]
        data: Option<String>,
    },
    Message {
        id: String,
        url: String,
        direction: Direction,
        #[serde(default)]
        data: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Selectors {
    #[serde(default)]
    pub test_id: Option<String>,
    #[serde(default)]
    pub role: Option<RoleSelector>,
    #[serde(default)]
    pub aria_label: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub css_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoleSelector {
    pub role: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EnhancedAction {
    Click {
        timestamp: f64,
        url: String,
        #[serde(default)]
        selectors: Option<Selectors>,
    },
    Input {
        timestamp: f64,
        url: String,
        #[serde(default)]
        selectors: Option<Selectors>,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        input_type: Option<String>,
    },
    Keypress {
        timestamp: f64,
        url: String,
        #[serde(default)]
        key: Option<String>,
    },
    Navigate {
        timestamp: f64,
        url: String,
        #[serde(default)]
        to_url: Option<String>,
    },
    Select {
        timestamp: f64,
        url: String,
        #[serde(default)]
        selectors: Option<Selectors>,
        #[serde(default)]
        selected_value: Option<String>,
    },
    Scroll {
        timestamp: f64,
        url: String,
        #[serde(default)]
        scroll_y: Option<f64>,
    },
}

impl EnhancedAction {
    pub fn type_name(&self) -> &'static str {
        match self {
            EnhancedAction::Click { .. } => "click",
            EnhancedAction::Input { .. } => "input",
            EnhancedAction::Keypress { .. } => "keypress",
            EnhancedAction::Navigate { .. } => "navigate",
            EnhancedAction::Select { .. } => "select",
            EnhancedAction::Scroll { .. } => "scroll",
        }
    }

    pub fn url(&self) -> &str {
        match self {
            EnhancedAction::Click { url, .. }
            | EnhancedAction::Input { url, .. }
            | EnhancedAction::Keypress { url, .. }
            | EnhancedAction::Navigate { url, .. }
            | EnhancedAction::Select { url, .. }
            | EnhancedAction::Scroll { url, .. } => url,
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            EnhancedAction::Click { timestamp, .. }
            | EnhancedAction::Input { timestamp, .. }
            | EnhancedAction::Keypress { timestamp, .. }
            | EnhancedAction::Navigate { timestamp, .. }
            | EnhancedAction::Select { timestamp, .. }
            | EnhancedAction::Scroll { timestamp, .. } => *timestamp,
        }
    }

    /// Password redaction on ingest (§4.2): any `input` action whose
    /// `input_type == "password"` has its value overwritten in place.
    pub fn redact_password(&mut self) {
        if let EnhancedAction::Input {
            value, input_type, ..
        } = self
        {
            if input_type.as_deref() == Some("password") {
                *value = Some("[redacted]".to_string());
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Timing {
    pub load: f64,
    pub dom_content_loaded: f64,
    pub dom_interactive: f64,
    pub time_to_first_byte: f64,
    #[serde(default)]
    pub first_contentful_paint: Option<f64>,
    #[serde(default)]
    pub largest_contentful_paint: Option<f64>,
    #[serde(default)]
    pub interaction_to_next_paint: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NetworkSummary {
    pub request_count: u32,
    pub transfer_size: u64,
    pub decoded_size: u64,
    #[serde(default)]
    pub slowest_requests: Vec<SlowRequest>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlowRequest {
    pub url: String,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LongTasks {
    pub count: u32,
    pub total_blocking_time: f64,
    pub longest: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Resource {
    pub url: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub transfer_size: u64,
    pub duration: f64,
    #[serde(default)]
    pub render_blocking: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PerformanceSnapshot {
    pub url: String,
    pub timestamp: String,
    pub timing: Timing,
    pub network: NetworkSummary,
    pub long_tasks: LongTasks,
    #[serde(default)]
    pub cls: Option<f64>,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PerformanceBaseline {
    pub sample_count: u32,
    pub last_updated: String,
    pub timing: Timing,
    pub network: NetworkSummary,
    pub long_tasks: LongTasks,
    #[serde(default)]
    pub cls: Option<f64>,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub status: u16,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub log_total: u64,
    pub network_total: u64,
    pub ws_total: u64,
    pub action_total: u64,
    pub known_endpoints: std::collections::HashMap<String, EndpointStatus>,
}

impl Checkpoint {
    pub fn zero(now: chrono::DateTime<chrono::Utc>) -> Self {
        Checkpoint {
            name: None,
            created_at: now,
            log_total: 0,
            network_total: 0,
            ws_total: 0,
            action_total: 0,
            known_endpoints: std::collections::HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertMetric {
    pub baseline: f64,
    pub current: f64,
    pub delta_ms: f64,
    pub delta_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingAlert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: &'static str,
    pub url: String,
    pub detected_at: chrono::DateTime<chrono::Utc>,
    pub metrics: std::collections::HashMap<String, AlertMetric>,
    pub summary: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingDelta {
    pub load: Option<f64>,
    pub fcp: Option<f64>,
    pub lcp: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddedResource {
    pub url: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub size_bytes: u64,
    pub duration_ms: f64,
    pub render_blocking: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovedResource {
    pub url: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResizedResource {
    pub url: String,
    pub baseline_bytes: u64,
    pub current_bytes: u64,
    pub delta_bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetimedResource {
    pub url: String,
    pub baseline_ms: f64,
    pub current_ms: f64,
    pub delta_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceChanges {
    pub added: Vec<AddedResource>,
    pub removed: Vec<RemovedResource>,
    pub resized: Vec<ResizedResource>,
    pub retimed: Vec<RetimedResource>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsoleErrorGroup {
    pub message: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsoleDiff {
    pub errors: Vec<ConsoleErrorGroup>,
    pub warnings: Vec<ConsoleErrorGroup>,
    pub total_new: u64,
}

impl ConsoleDiff {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty() && self.total_new == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkFailure {
    pub path: String,
    pub status: u16,
    pub previous_status: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewEndpoint {
    pub path: String,
    pub status: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct DegradedEndpoint {
    pub path: String,
    pub duration_ms: f64,
    pub baseline_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkDiff {
    pub failures: Vec<NetworkFailure>,
    pub new_endpoints: Vec<NewEndpoint>,
    pub degraded: Vec<DegradedEndpoint>,
    pub total_new: u64,
}

impl NetworkDiff {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
            && self.new_endpoints.is_empty()
            && self.degraded.is_empty()
            && self.total_new == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WsConnection {
    pub url: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WsDisconnection {
    pub url: String,
    pub close_code: Option<i32>,
    pub close_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WsError {
    pub url: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WebSocketDiff {
    pub connections: Vec<WsConnection>,
    pub disconnections: Vec<WsDisconnection>,
    pub errors: Vec<WsError>,
    pub total_new: u64,
}

impl WebSocketDiff {
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
            && self.disconnections.is_empty()
            && self.errors.is_empty()
            && self.total_new == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionSummary {
    #[serde(rename = "type")]
    pub action_type: String,
    pub url: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionsDiff {
    pub actions: Vec<ActionSummary>,
    pub total_new: u64,
}

impl ActionsDiff {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.total_new == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Clean,
    Warning,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangesSinceParams {
    #[serde(default)]
    pub checkpoint: Option<String>,
    #[serde(default)]
    pub include: Option<Vec<String>>,
    #[serde(default)]
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console: Option<ConsoleDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket: Option<WebSocketDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<ActionsDiff>,
    pub duration_ms: i64,
    pub severity: Severity,
    pub summary: String,
    pub alerts: Vec<PendingAlert>,
    pub token_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CausalDiffResult {
    pub url: String,
    pub timing_delta: TimingDelta,
    pub resource_changes: ResourceChanges,
    pub probable_cause: String,
    pub recommendations: Vec<String>,
}
