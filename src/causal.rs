//! Causal resource diff (§4.7): baseline-vs-current comparison of a page's
//! resource graph, with a synthesized probable cause and recommendations.

use std::collections::HashMap;

use crate::fingerprint::{dynamic_api_path, normalize_resource_url};
use crate::types::{
    AddedResource, CausalDiffResult, PerformanceBaseline, PerformanceSnapshot, RemovedResource,
    ResizedResource, ResourceChanges, Resource, RetimedResource, TimingDelta,
};

const RESIZE_FLOOR_BYTES: f64 = 10.0 * 1024.0;
const RETIME_THRESHOLD_MS: f64 = 100.0;
const CODE_SPLIT_THRESHOLD_BYTES: u64 = 100 * 1024;

fn resource_key(resource: &Resource) -> String {
    match resource.resource_type.as_str() {
        "fetch" | "xmlhttprequest" => dynamic_api_path(&resource.resource_type, &resource.url),
        _ => normalize_resource_url(&resource.url),
    }
}

pub fn causal_diff(snapshot: &PerformanceSnapshot, baseline: &PerformanceBaseline) -> CausalDiffResult {
    let timing_delta = TimingDelta {
        load: Some(snapshot.timing.load - baseline.timing.load),
        fcp: match (
            snapshot.timing.first_contentful_paint,
            baseline.timing.first_contentful_paint,
        ) {
            (Some(c), Some(b)) => Some(c - b),
            _ => None,
        },
        lcp: match (
            snapshot.timing.largest_contentful_paint,
            baseline.timing.largest_contentful_paint,
        ) {
            (Some(c), Some(b)) => Some(c - b),
            _ => None,
        },
    };

    let mut baseline_by_key: HashMap<String, &Resource> = HashMap::new();
    for r in &baseline.resources {
        baseline_by_key.insert(resource_key(r), r);
    }
    let mut current_by_key: HashMap<String, &Resource> = HashMap::new();
    for r in &snapshot.resources {
        current_by_key.insert(resource_key(r), r);
    }

    let mut changes = ResourceChanges::default();

    for (key, current) in &current_by_key {
        match baseline_by_key.get(key) {
            None => changes.added.push(AddedResource {
                url: current.url.clone(),
                resource_type: current.resource_type.clone(),
                size_bytes: current.transfer_size,
                duration_ms: current.duration,
                render_blocking: current.render_blocking,
            }),
            Some(baseline_resource) => {
                let size_delta =
                    (current.transfer_size as i64 - baseline_resource.transfer_size as i64).abs();
                let resize_threshold =
                    (baseline_resource.transfer_size as f64 * 0.10).min(RESIZE_FLOOR_BYTES);
                if size_delta as f64 > resize_threshold {
                    changes.resized.push(ResizedResource {
                        url: current.url.clone(),
                        baseline_bytes: baseline_resource.transfer_size,
                        current_bytes: current.transfer_size,
                        delta_bytes: current.transfer_size as i64 - baseline_resource.transfer_size as i64,
                    });
                }
                let duration_delta = (current.duration - baseline_resource.duration).abs();
                if duration_delta > RETIME_THRESHOLD_MS {
                    changes.retimed.push(RetimedResource {
                        url: current.url.clone(),
                        baseline_ms: baseline_resource.duration,
                        current_ms: current.duration,
                        delta_ms: current.duration - baseline_resource.duration,
                    });
                }
            }
        }
    }

    for (key, baseline_resource) in &baseline_by_key {
        if !current_by_key.contains_key(key) {
            changes.removed.push(RemovedResource {
                url: baseline_resource.url.clone(),
                resource_type: baseline_resource.resource_type.clone(),
                size_bytes: baseline_resource.transfer_size,
            });
        }
    }

    let (probable_cause, recommendations) = if baseline.resources.is_empty() && snapshot.resources.is_empty() {
        (
            "No resource data available for this URL yet; baseline and current snapshots both carry an empty resource list.".to_string(),
            Vec::new(),
        )
    } else {
        synthesize_cause(&changes)
    };

    CausalDiffResult {
        url: snapshot.url.clone(),
        timing_delta,
        resource_changes: changes,
        probable_cause,
        recommendations,
    }
}

fn synthesize_cause(changes: &ResourceChanges) -> (String, Vec<String>) {
    if changes.added.is_empty()
        && changes.removed.is_empty()
        && changes.resized.is_empty()
        && changes.retimed.is_empty()
    {
        return (
            "No resource graph changes detected; the regression is likely attributable to backend response time, DOM/JS execution, or browser-side variance rather than the network payload.".to_string(),
            Vec::new(),
        );
    }

    let mut recommendations = Vec::new();
    let mut clauses = Vec::new();

    let added_bytes: u64 = changes.added.iter().map(|a| a.size_bytes).sum();
    if added_bytes > 0 {
        clauses.push(format!(
            "Added {} across {} new resource(s)",
            crate::fingerprint::format_bytes(added_bytes),
            changes.added.len()
        ));
    }

    let blocking_additions: Vec<&AddedResource> =
        changes.added.iter().filter(|a| a.render_blocking).collect();
    if !blocking_additions.is_empty() {
        let names = blocking_additions
            .iter()
            .map(|a| a.url.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        clauses.push(format!(
            "{} render-blocking addition(s) ({names})",
            blocking_additions.len()
        ));
        recommendations.push(format!(
            "Lazy-load non-critical script(s): {names} are render-blocking and newly added."
        ));
    }

    if !changes.retimed.is_empty() {
        let names = changes
            .retimed
            .iter()
            .map(|r| r.url.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        clauses.push(format!("{} API call(s) slowed down", changes.retimed.len()));
        recommendations.push(format!(
            "Investigate retimed API endpoint(s): {names} now take significantly longer to complete."
        ));
    }

    if !changes.resized.is_empty() {
        clauses.push(format!("{} resource(s) changed size", changes.resized.len()));
        recommendations.push("Review resized bundle(s) for unintended dependency growth.".to_string());
    }

    let non_blocking_large: Vec<&AddedResource> = changes
        .added
        .iter()
        .filter(|a| !a.render_blocking && a.size_bytes > CODE_SPLIT_THRESHOLD_BYTES)
        .collect();
    if !non_blocking_large.is_empty() {
        let names = non_blocking_large
            .iter()
            .map(|a| a.url.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        recommendations.push(format!(
            "Consider code-splitting large non-blocking addition(s): {names} exceed 100KB."
        ));
    }

    if added_bytes > 0 {
        clauses.push(format!("overall payload growth of {}", crate::fingerprint::format_bytes(added_bytes)));
    }

    let cause = if clauses.is_empty() {
        "Resource graph changed without a clear size or timing signal; inspect the diff directly.".to_string()
    } else {
        clauses.join("; ")
    };

    (cause, recommendations)
}
