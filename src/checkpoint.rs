//! Checkpoint & diff engine (§4.3, §4.6).
//!
//! Owns named checkpoints, the auto-checkpoint, and the pending-alerts
//! queue behind a single mutex (§5). Diff construction reads through the
//! ingestion buffers and the performance store but copies what it needs
//! under each buffer's own read lock before releasing it, so cross-category
//! tearing is possible but each category's own view is internally
//! consistent.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::buffers::IngestionBuffers;
use crate::error::CoreError;
use crate::fingerprint::fingerprint_message;
use crate::types::{
    ActionSummary, ActionsDiff, ChangesSinceParams, Checkpoint, ConsoleDiff, ConsoleErrorGroup,
    DegradedEndpoint, DiffResponse, EndpointStatus, NetworkDiff, NetworkFailure, NewEndpoint,
    PendingAlert, Severity, WebSocketDiff, WsConnection, WsDisconnection, WsError,
};
use crate::types::{PerformanceBaseline, PerformanceSnapshot};

const MAX_NAMED_CHECKPOINTS: usize = 20;
const MAX_PENDING_ALERTS: usize = 10;
const CONSOLE_DISTINCT_CAP: usize = 50;
const NETWORK_CATEGORY_CAP: usize = 50;
const WS_CATEGORY_CAP: usize = 50;
const ACTIONS_CAP: usize = 50;
const MESSAGE_TRUNCATE: usize = 200;

struct State {
    named: HashMap<String, Checkpoint>,
    named_order: Vec<String>,
    auto: Option<Checkpoint>,
    pending_alerts: VecDeque<PendingAlert>,
}

pub struct CheckpointEngine {
    state: Mutex<State>,
}

impl CheckpointEngine {
    pub fn new() -> Self {
        CheckpointEngine {
            state: Mutex::new(State {
                named: HashMap::new(),
                named_order: Vec::new(),
                auto: None,
                pending_alerts: VecDeque::new(),
            }),
        }
    }

    pub fn create_checkpoint(
        &self,
        name: &str,
        buffers: &IngestionBuffers,
    ) -> Result<(), CoreError> {
        if name.is_empty() || name.chars().count() > 50 {
            return Err(CoreError::InvalidName);
        }
        let (log_total, network_total, ws_total, action_total) = buffers.totals();
        let known_endpoints = build_known_endpoints(buffers, &HashMap::new());
        let cp = Checkpoint {
            name: Some(name.to_string()),
            created_at: Utc::now(),
            log_total,
            network_total,
            ws_total,
            action_total,
            known_endpoints,
        };
        let mut state = self.state.lock().unwrap();
        if !state.named.contains_key(name) {
            state.named_order.push(name.to_string());
        }
        state.named.insert(name.to_string(), cp);
        while state.named_order.len() > MAX_NAMED_CHECKPOINTS {
            let oldest = state.named_order.remove(0);
            state.named.remove(&oldest);
        }
        Ok(())
    }

    /// Regression detection hook, invoked synchronously after each
    /// performance-snapshot push with the baseline captured *before* the
    /// push (§4.5). Silently skipped when that baseline has no samples yet.
    pub fn detect_and_store_alerts(
        &self,
        snapshot: &PerformanceSnapshot,
        baseline_before: Option<&PerformanceBaseline>,
    ) {
        let Some(baseline) = baseline_before else {
            return;
        };
        if baseline.sample_count < 1 {
            return;
        }
        let metrics = crate::regression::detect_metrics(snapshot, baseline);
        let mut state = self.state.lock().unwrap();
        state.pending_alerts.retain(|a| a.url != snapshot.url);
        if let Some(alert) = crate::regression::build_alert(&snapshot.url, metrics) {
            state.pending_alerts.push_back(alert);
            while state.pending_alerts.len() > MAX_PENDING_ALERTS {
                state.pending_alerts.pop_front();
            }
        }
    }

    pub fn get_changes_since(
        &self,
        params: &ChangesSinceParams,
        buffers: &IngestionBuffers,
    ) -> DiffResponse {
        let now = Utc::now();
        let (resolved, advances_auto) = self.resolve_checkpoint(params, buffers, now);

        let include: Vec<&str> = params
            .include
            .as_ref()
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_else(|| vec!["console", "network", "websocket", "actions"]);
        let errors_only = params.severity.as_deref() == Some("errors_only");

        let console = if include.contains(&"console") {
            Some(diff_console(buffers, &resolved, errors_only))
        } else {
            None
        };
        let network = if include.contains(&"network") {
            Some(diff_network(buffers, &resolved))
        } else {
            None
        };
        let websocket = if include.contains(&"websocket") {
            Some(diff_websocket(buffers, &resolved, errors_only))
        } else {
            None
        };
        let actions = if include.contains(&"actions") {
            Some(diff_actions(buffers, &resolved))
        } else {
            None
        };

        let severity = compute_severity(&console, &network, &websocket);
        let summary = compute_summary(&console, &network, &websocket);

        let alerts = {
            let mut state = self.state.lock().unwrap();
            let eligible: Vec<PendingAlert> = state
                .pending_alerts
                .iter()
                .filter(|a| a.detected_at > resolved.created_at)
                .cloned()
                .collect();
            if advances_auto {
                let delivered_ids: std::collections::HashSet<&str> =
                    eligible.iter().map(|a| a.id.as_str()).collect();
                state
                    .pending_alerts
                    .retain(|a| !delivered_ids.contains(a.id.as_str()));
            }
            eligible
        };

        let duration_ms = (now - resolved.created_at).num_milliseconds();

        let mut response = DiffResponse {
            console: console.filter(|c| !c.is_empty()),
            network: network.filter(|n| !n.is_empty()),
            websocket: websocket.filter(|w| !w.is_empty()),
            actions: actions.filter(|a| !a.is_empty()),
            duration_ms,
            severity,
            summary,
            alerts,
            token_count: 0,
        };
        let serialized = serde_json::to_string(&response).unwrap_or_default();
        response.token_count = (serialized.len() / 4) as u64;

        if advances_auto {
            self.advance_auto(buffers, now);
        }

        response
    }

    /// Returns the checkpoint to diff against, plus whether this call should
    /// advance the auto-checkpoint afterward (§4.3 resolution rules).
    fn resolve_checkpoint(
        &self,
        params: &ChangesSinceParams,
        buffers: &IngestionBuffers,
        now: DateTime<Utc>,
    ) -> (Checkpoint, bool) {
        match params.checkpoint.as_deref() {
            None | Some("") => {
                let state = self.state.lock().unwrap();
                let cp = state.auto.clone().unwrap_or_else(|| Checkpoint::zero(now));
                (cp, true)
            }
            Some(name) => {
                let named = {
                    let state = self.state.lock().unwrap();
                    state.named.get(name).cloned()
                };
                match named {
                    Some(cp) => (cp, false),
                    None => match parse_timestamp(name) {
                        Some(t) => (resolve_timestamp_checkpoint(t, buffers), false),
                        None => (Checkpoint::zero(now), false),
                    },
                }
            }
        }
    }

    fn advance_auto(&self, buffers: &IngestionBuffers, now: DateTime<Utc>) {
        let (log_total, network_total, ws_total, action_total) = buffers.totals();
        let mut state = self.state.lock().unwrap();
        let existing_known = state
            .auto
            .as_ref()
            .map(|c| c.known_endpoints.clone())
            .unwrap_or_default();
        let known_endpoints = build_known_endpoints(buffers, &existing_known);
        state.auto = Some(Checkpoint {
            name: None,
            created_at: now,
            log_total,
            network_total,
            ws_total,
            action_total,
            known_endpoints,
        });
    }
}

impl Default for CheckpointEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// `resolve_checkpoint`'s timestamp branch actually needs the buffers to
/// turn a point in time into per-category positions; that resolution
/// happens here rather than inside `resolve_checkpoint` because it needs a
/// read lock on every buffer, which the checkpoint mutex must never be held
/// across (lock ordering, §5).
fn resolve_timestamp_checkpoint(
    t: DateTime<Utc>,
    buffers: &IngestionBuffers,
) -> Checkpoint {
    Checkpoint {
        name: None,
        created_at: t,
        log_total: buffers.console.read().unwrap().position_at(t),
        network_total: buffers.network.read().unwrap().position_at(t),
        ws_total: buffers.websocket.read().unwrap().position_at(t),
        action_total: buffers.action.read().unwrap().position_at(t),
        known_endpoints: HashMap::new(),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn build_known_endpoints(
    buffers: &IngestionBuffers,
    existing: &HashMap<String, EndpointStatus>,
) -> HashMap<String, EndpointStatus> {
    let mut merged = existing.clone();
    let network = buffers.network.read().unwrap();
    for body in network.entries() {
        merged.insert(
            body.path(),
            EndpointStatus {
                status: body.status,
                duration_ms: body.duration_ms,
            },
        );
    }
    merged
}

fn diff_console(buffers: &IngestionBuffers, cp: &Checkpoint, errors_only: bool) -> ConsoleDiff {
    let ring = buffers.console.read().unwrap();
    let raw_delta = ring.total_added().saturating_sub(cp.log_total);
    let read_n = raw_delta.min(ring.len() as u64);
    let window = ring.last(read_n);

    let mut errors: Vec<ConsoleErrorGroup> = Vec::new();
    let mut warnings: Vec<ConsoleErrorGroup> = Vec::new();

    for entry in window {
        let level = entry.level.to_lowercase();
        let bucket = match level.as_str() {
            "error" => &mut errors,
            "warn" | "warning" => &mut warnings,
            _ => continue,
        };
        let fp = fingerprint_message(&entry.message);
        if let Some(group) = bucket.iter_mut().find(|g| g.message == fp) {
            group.count += 1;
        } else if bucket.len() < CONSOLE_DISTINCT_CAP {
            let mut display = entry.message.clone();
            if display.chars().count() > MESSAGE_TRUNCATE {
                display = display.chars().take(MESSAGE_TRUNCATE).collect();
            }
            bucket.push(ConsoleErrorGroup {
                message: display,
                count: 1,
            });
        }
    }

    if errors_only {
        warnings.clear();
    }

    ConsoleDiff {
        errors,
        warnings,
        total_new: raw_delta,
    }
}

fn diff_network(buffers: &IngestionBuffers, cp: &Checkpoint) -> NetworkDiff {
    let ring = buffers.network.read().unwrap();
    let raw_delta = ring.total_added().saturating_sub(cp.network_total);
    let read_n = raw_delta.min(ring.len() as u64);
    let window = ring.last(read_n);

    let mut failures: Vec<NetworkFailure> = Vec::new();
    let mut new_endpoints: Vec<NewEndpoint> = Vec::new();
    let mut degraded: Vec<DegradedEndpoint> = Vec::new();
    let mut seen_new: std::collections::HashSet<String> = std::collections::HashSet::new();

    for body in window {
        let path = body.path();
        let known = cp.known_endpoints.get(&path);

        if body.status >= 400 {
            match known {
                Some(prior) if prior.status < 400 => {
                    if failures.len() < NETWORK_CATEGORY_CAP {
                        failures.push(NetworkFailure {
                            path: path.clone(),
                            status: body.status,
                            previous_status: prior.status,
                        });
                    }
                }
                None => {
                    if seen_new.insert(path.clone()) && new_endpoints.len() < NETWORK_CATEGORY_CAP
                    {
                        new_endpoints.push(NewEndpoint {
                            path: path.clone(),
                            status: body.status,
                        });
                    }
                }
                _ => {}
            }
        } else {
            match known {
                None => {
                    if seen_new.insert(path.clone()) && new_endpoints.len() < NETWORK_CATEGORY_CAP
                    {
                        new_endpoints.push(NewEndpoint {
                            path: path.clone(),
                            status: body.status,
                        });
                    }
                }
                Some(prior) if prior.duration_ms > 0.0 && body.duration_ms > prior.duration_ms * 3.0 => {
                    if degraded.len() < NETWORK_CATEGORY_CAP {
                        degraded.push(DegradedEndpoint {
                            path: path.clone(),
                            duration_ms: body.duration_ms,
                            baseline_ms: prior.duration_ms,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    NetworkDiff {
        failures,
        new_endpoints,
        degraded,
        total_new: raw_delta,
    }
}

fn diff_websocket(buffers: &IngestionBuffers, cp: &Checkpoint, errors_only: bool) -> WebSocketDiff {
    use crate::types::WebSocketEvent;

    let ring = buffers.websocket.read().unwrap();
    let raw_delta = ring.total_added().saturating_sub(cp.ws_total);
    let read_n = raw_delta.min(ring.len() as u64);
    let window = ring.last(read_n);

    let mut connections = Vec::new();
    let mut disconnections = Vec::new();
    let mut errors = Vec::new();

    for event in window {
        match event {
            WebSocketEvent::Open { id, url } => {
                if connections.len() < WS_CATEGORY_CAP {
                    connections.push(WsConnection {
                        url: url.clone(),
                        id: id.clone(),
                    });
                }
            }
            WebSocketEvent::Close {
                url,
                close_code,
                close_reason,
                ..
            } => {
                if !errors_only && disconnections.len() < WS_CATEGORY_CAP {
                    disconnections.push(WsDisconnection {
                        url: url.clone(),
                        close_code: *close_code,
                        close_reason: close_reason.clone(),
                    });
                }
            }
            WebSocketEvent::Error { url, data, .. } => {
                if errors.len() < WS_CATEGORY_CAP {
                    errors.push(WsError {
                        url: url.clone(),
                        message: data.clone(),
                    });
                }
            }
            WebSocketEvent::Message { .. } => {}
        }
    }

    WebSocketDiff {
        connections,
        disconnections,
        errors,
        total_new: raw_delta,
    }
}

fn diff_actions(buffers: &IngestionBuffers, cp: &Checkpoint) -> ActionsDiff {
    let ring = buffers.action.read().unwrap();
    let raw_delta = ring.total_added().saturating_sub(cp.action_total);
    let read_n = raw_delta.min(ring.len() as u64);
    let window = ring.last(read_n);

    let actions = window
        .iter()
        .take(ACTIONS_CAP)
        .map(|a| ActionSummary {
            action_type: a.type_name().to_string(),
            url: a.url().to_string(),
            timestamp: a.timestamp(),
        })
        .collect();

    ActionsDiff {
        actions,
        total_new: raw_delta,
    }
}

fn compute_severity(
    console: &Option<ConsoleDiff>,
    network: &Option<NetworkDiff>,
    websocket: &Option<WebSocketDiff>,
) -> Severity {
    let has_errors = console.as_ref().map(|c| !c.errors.is_empty()).unwrap_or(false)
        || network.as_ref().map(|n| !n.failures.is_empty()).unwrap_or(false);
    if has_errors {
        return Severity::Error;
    }
    let has_warnings = console.as_ref().map(|c| !c.warnings.is_empty()).unwrap_or(false)
        || websocket
            .as_ref()
            .map(|w| !w.disconnections.is_empty())
            .unwrap_or(false);
    if has_warnings {
        return Severity::Warning;
    }
    Severity::Clean
}

fn compute_summary(
    console: &Option<ConsoleDiff>,
    network: &Option<NetworkDiff>,
    websocket: &Option<WebSocketDiff>,
) -> String {
    let errors = console.as_ref().map(|c| c.errors.len()).unwrap_or(0);
    let failures = network.as_ref().map(|n| n.failures.len()).unwrap_or(0);
    let warnings = console.as_ref().map(|c| c.warnings.len()).unwrap_or(0);
    let disconnections = websocket
        .as_ref()
        .map(|w| w.disconnections.len())
        .unwrap_or(0);

    let mut parts = Vec::new();
    if errors > 0 {
        parts.push(format!("{} error{}", errors, plural(errors)));
    }
    if failures > 0 {
        parts.push(format!("{} failure{}", failures, plural(failures)));
    }
    if warnings > 0 {
        parts.push(format!("{} warning{}", warnings, plural(warnings)));
    }
    if disconnections > 0 {
        parts.push(format!(
            "{} disconnection{}",
            disconnections,
            plural(disconnections)
        ));
    }
    if parts.is_empty() {
        "No significant changes.".to_string()
    } else {
        parts.join(", ")
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConsoleEntry;

    fn console_entry(level: &str, message: &str) -> ConsoleEntry {
        ConsoleEntry {
            level: level.to_string(),
            message: message.to_string(),
            source: None,
            extra: serde_json::Map::new(),
        }
    }

    fn network_body(url: &str, status: u16, duration_ms: f64) -> crate::types::NetworkBody {
        crate::types::NetworkBody {
            method: "GET".to_string(),
            url: url.to_string(),
            status,
            duration_ms,
            content_type: None,
            response_body: None,
        }
    }

    #[test]
    fn create_checkpoint_rejects_empty_and_overlong_names() {
        let engine = CheckpointEngine::new();
        let buffers = IngestionBuffers::new(100, 100);
        assert!(engine.create_checkpoint("", &buffers).is_err());
        let long_name: String = std::iter::repeat('a').take(51).collect();
        assert!(engine.create_checkpoint(&long_name, &buffers).is_err());
        assert!(engine.create_checkpoint("fifty-is-fine", &buffers).is_ok());
    }

    #[test]
    fn named_checkpoints_evict_oldest_past_cap() {
        let engine = CheckpointEngine::new();
        let buffers = IngestionBuffers::new(100, 100);
        for i in 0..(MAX_NAMED_CHECKPOINTS + 1) {
            engine
                .create_checkpoint(&format!("cp-{i}"), &buffers)
                .unwrap();
        }
        let state = engine.state.lock().unwrap();
        assert_eq!(state.named.len(), MAX_NAMED_CHECKPOINTS);
        assert!(!state.named.contains_key("cp-0"));
        assert!(state.named.contains_key(&format!("cp-{MAX_NAMED_CHECKPOINTS}")));
    }

    #[test]
    fn diff_console_dedups_repeated_errors_into_one_group() {
        let buffers = IngestionBuffers::new(100, 100);
        let cp = Checkpoint::zero(Utc::now());
        let batch = vec![
            console_entry("error", "boom at line 12"),
            console_entry("error", "boom at line 12"),
            console_entry("error", "boom at line 12"),
            console_entry("error", "boom at line 12"),
            console_entry("error", "boom at line 12"),
        ];
        buffers.add_console(batch);
        let diff = diff_console(&buffers, &cp, false);
        assert_eq!(diff.errors.len(), 1);
        assert_eq!(diff.errors[0].count, 5);
        assert_eq!(diff.total_new, 5);
    }

    #[test]
    fn diff_network_flags_status_regression_on_known_endpoint() {
        let buffers = IngestionBuffers::new(100, 100);
        let mut known = HashMap::new();
        known.insert(
            "/api/orders".to_string(),
            EndpointStatus {
                status: 200,
                duration_ms: 50.0,
            },
        );
        let cp = Checkpoint {
            name: None,
            created_at: Utc::now(),
            log_total: 0,
            network_total: 0,
            ws_total: 0,
            action_total: 0,
            known_endpoints: known,
        };
        buffers.add_network(vec![network_body("https://x.test/api/orders", 500, 80.0)]);
        let diff = diff_network(&buffers, &cp);
        assert_eq!(diff.failures.len(), 1);
        assert_eq!(diff.failures[0].previous_status, 200);
        assert!(diff.new_endpoints.is_empty());
    }

    #[test]
    fn diff_network_never_seen_endpoint_that_fails_is_new_not_failure() {
        let buffers = IngestionBuffers::new(100, 100);
        let cp = Checkpoint::zero(Utc::now());
        buffers.add_network(vec![network_body("https://x.test/api/new", 500, 80.0)]);
        let diff = diff_network(&buffers, &cp);
        assert!(diff.failures.is_empty());
        assert_eq!(diff.new_endpoints.len(), 1);
        assert_eq!(diff.new_endpoints[0].status, 500);
    }

    #[test]
    fn websocket_disconnection_drives_warning_severity() {
        let buffers = IngestionBuffers::new(100, 100);
        buffers.add_websocket(vec![crate::types::WebSocketEvent::Close {
            id: "ws-1".to_string(),
            url: "wss://x.test/socket".to_string(),
            close_code: Some(1006),
            close_reason: None,
        }]);
        let cp = Checkpoint::zero(Utc::now());
        let websocket = Some(diff_websocket(&buffers, &cp, false));
        let severity = compute_severity(&None, &None, &websocket);
        assert_eq!(severity, Severity::Warning);
    }

    #[test]
    fn get_changes_since_on_empty_server_is_clean() {
        let engine = CheckpointEngine::new();
        let buffers = IngestionBuffers::new(100, 100);
        let params = ChangesSinceParams {
            checkpoint: None,
            include: None,
            severity: None,
        };
        let response = engine.get_changes_since(&params, &buffers);
        assert_eq!(response.severity, Severity::Clean);
        assert_eq!(response.summary, "No significant changes.");
        assert!(response.alerts.is_empty());
    }
}
