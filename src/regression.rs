//! Performance regression detection (§4.5).
//!
//! A pure function over a snapshot and the baseline captured *before* that
//! snapshot was pushed — the caller (the checkpoint engine, which owns the
//! pending-alerts queue) decides what to do with the result.

use std::collections::HashMap;

use chrono::Utc;
use rand::Rng;

use crate::types::{AlertMetric, PendingAlert, PerformanceBaseline, PerformanceSnapshot};

/// Priority order used both for picking the alert's headline metric and the
/// metric whose recommendation is surfaced.
const METRIC_PRIORITY: [&str; 6] = ["load", "fcp", "lcp", "ttfb", "cls", "transfer_bytes"];

/// Computes which metrics regressed. Returns an empty map if none did.
/// Callers must separately check `baseline.sample_count >= 1` before relying
/// on this — the detector itself does not look at sample count.
pub fn detect_metrics(
    snapshot: &PerformanceSnapshot,
    baseline: &PerformanceBaseline,
) -> HashMap<String, AlertMetric> {
    let mut out = HashMap::new();

    let timed_candidates: [(&str, Option<f64>, Option<f64>, f64); 4] = [
        (
            "load",
            Some(baseline.timing.load),
            Some(snapshot.timing.load),
            20.0,
        ),
        (
            "fcp",
            baseline.timing.first_contentful_paint,
            snapshot.timing.first_contentful_paint,
            20.0,
        ),
        (
            "lcp",
            baseline.timing.largest_contentful_paint,
            snapshot.timing.largest_contentful_paint,
            20.0,
        ),
        (
            "ttfb",
            Some(baseline.timing.time_to_first_byte),
            Some(snapshot.timing.time_to_first_byte),
            50.0,
        ),
    ];

    for (name, baseline_value, current_value, pct_threshold) in timed_candidates {
        let (Some(baseline_value), Some(current_value)) = (baseline_value, current_value) else {
            continue;
        };
        if baseline_value <= 0.0 {
            continue;
        }
        let delta_ms = current_value - baseline_value;
        let delta_pct = delta_ms / baseline_value * 100.0;
        if delta_pct > pct_threshold {
            out.insert(
                name.to_string(),
                AlertMetric {
                    baseline: baseline_value,
                    current: current_value,
                    delta_ms,
                    delta_pct,
                },
            );
        }
    }

    // transfer_bytes
    let baseline_bytes = baseline.network.transfer_size as f64;
    let current_bytes = snapshot.network.transfer_size as f64;
    if baseline_bytes > 0.0 {
        let delta = current_bytes - baseline_bytes;
        let delta_pct = delta / baseline_bytes * 100.0;
        if delta_pct > 25.0 {
            out.insert(
                "transfer_bytes".to_string(),
                AlertMetric {
                    baseline: baseline_bytes,
                    current: current_bytes,
                    delta_ms: delta,
                    delta_pct,
                },
            );
        }
    }

    // cls: absolute delta threshold, delta_pct reported as 0 when baseline is 0
    if let (Some(baseline_cls), Some(current_cls)) = (baseline.cls, snapshot.cls) {
        let delta = current_cls - baseline_cls;
        if delta.abs() > 0.10 {
            let delta_pct = if baseline_cls == 0.0 {
                0.0
            } else {
                delta / baseline_cls * 100.0
            };
            out.insert(
                "cls".to_string(),
                AlertMetric {
                    baseline: baseline_cls,
                    current: current_cls,
                    delta_ms: delta,
                    delta_pct,
                },
            );
        }
    }

    out
}

/// Build a pending alert from a triggered-metrics map. Returns `None` if the
/// map is empty (no regression).
pub fn build_alert(url: &str, metrics: HashMap<String, AlertMetric>) -> Option<PendingAlert> {
    if metrics.is_empty() {
        return None;
    }
    let primary = METRIC_PRIORITY
        .iter()
        .find(|m| metrics.contains_key(**m))
        .copied()
        .unwrap_or("load");

    let summary = if let Some(load) = metrics.get("load") {
        format!("Load time regressed by {:.0}ms on {}", load.delta_ms, url)
    } else {
        format!("{} regressed on {}", primary, url)
    };

    let recommendation = recommendation_for(primary);

    let mut rng = rand::thread_rng();
    let id = format!(
        "alert_{}_{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        rng.gen::<u32>()
    );

    Some(PendingAlert {
        id,
        alert_type: "regression",
        url: url.to_string(),
        detected_at: Utc::now(),
        metrics,
        summary,
        recommendation,
    })
}

fn recommendation_for(metric: &str) -> String {
    match metric {
        "load" => "Investigate render-blocking resources and reduce the critical path length.",
        "fcp" => "Defer non-critical CSS/JS to improve first paint.",
        "lcp" => "Prioritize loading of the largest contentful element (image/video).",
        "ttfb" => "Investigate backend or server response time regressions.",
        "cls" => "Reserve space for dynamically injected content to reduce layout shift.",
        "transfer_bytes" => "Audit recently added or enlarged network resources.",
        _ => "Investigate the regressed metric.",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LongTasks, NetworkSummary, Timing};

    fn baseline_with_load(load: f64) -> PerformanceBaseline {
        PerformanceBaseline {
            sample_count: 3,
            last_updated: Utc::now().to_rfc3339(),
            timing: Timing {
                load,
                dom_content_loaded: 0.0,
                dom_interactive: 0.0,
                time_to_first_byte: 100.0,
                first_contentful_paint: None,
                largest_contentful_paint: None,
                interaction_to_next_paint: None,
            },
            network: NetworkSummary {
                request_count: 5,
                transfer_size: 50_000,
                decoded_size: 50_000,
                slowest_requests: vec![],
            },
            long_tasks: LongTasks {
                count: 0,
                total_blocking_time: 0.0,
                longest: 0.0,
            },
            cls: None,
            resources: vec![],
        }
    }

    fn snapshot_with_load(load: f64) -> PerformanceSnapshot {
        PerformanceSnapshot {
            url: "https://x.test".into(),
            timestamp: Utc::now().to_rfc3339(),
            timing: Timing {
                load,
                dom_content_loaded: 0.0,
                dom_interactive: 0.0,
                time_to_first_byte: 100.0,
                first_contentful_paint: None,
                largest_contentful_paint: None,
                interaction_to_next_paint: None,
            },
            network: NetworkSummary {
                request_count: 5,
                transfer_size: 50_000,
                decoded_size: 50_000,
                slowest_requests: vec![],
            },
            long_tasks: LongTasks {
                count: 0,
                total_blocking_time: 0.0,
                longest: 0.0,
            },
            cls: None,
            resources: vec![],
        }
    }

    #[test]
    fn load_regression_triggers_with_only_load_key() {
        let baseline = baseline_with_load(1000.0);
        let snap = snapshot_with_load(1300.0);
        let metrics = detect_metrics(&snap, &baseline);
        assert_eq!(metrics.len(), 1);
        let m = &metrics["load"];
        assert_eq!(m.delta_ms, 300.0);
        assert!((29.0..=31.0).contains(&m.delta_pct));
        assert!(!metrics.contains_key("fcp"));
        assert!(!metrics.contains_key("ttfb"));
    }

    #[test]
    fn no_regression_under_threshold() {
        let baseline = baseline_with_load(1000.0);
        let snap = snapshot_with_load(1100.0);
        let metrics = detect_metrics(&snap, &baseline);
        assert!(metrics.is_empty());
    }

    #[test]
    fn alert_summary_prioritizes_load() {
        let baseline = baseline_with_load(1000.0);
        let snap = snapshot_with_load(1300.0);
        let metrics = detect_metrics(&snap, &baseline);
        let alert = build_alert("https://x.test", metrics).unwrap();
        assert!(alert.summary.starts_with("Load time regressed by 300ms"));
    }
}
