//! Performance baseline store (§4.4).
//!
//! Holds, per URL, the latest snapshot plus a running baseline averaged
//! across samples. Both maps are LRU-evicted under one lock so a touch
//! always moves its key to the most-recent position without needing a
//! language-specific ordered map (§9).

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use crate::fingerprint::normalize_resource_url;
use crate::types::{NetworkSummary, PerformanceBaseline, PerformanceSnapshot, Resource, Timing};

const SNAPSHOT_CAP: usize = 50;
const BASELINE_CAP: usize = 100;

struct Lru {
    order: Vec<String>,
}

impl Lru {
    fn new() -> Self {
        Lru { order: Vec::new() }
    }

    /// Move `key` to the most-recent position, inserting it if absent.
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push(key.to_string());
    }

    fn evict_oldest(&mut self) -> Option<String> {
        if self.order.is_empty() {
            None
        } else {
            Some(self.order.remove(0))
        }
    }

    fn remove(&mut self, key: &str) {
        self.order.retain(|k| k != key);
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

struct Inner {
    snapshots: HashMap<String, PerformanceSnapshot>,
    snapshot_lru: Lru,
    baselines: HashMap<String, PerformanceBaseline>,
    baseline_lru: Lru,
    latest_url: Option<String>,
}

pub struct PerformanceStore {
    inner: RwLock<Inner>,
}

impl PerformanceStore {
    pub fn new() -> Self {
        PerformanceStore {
            inner: RwLock::new(Inner {
                snapshots: HashMap::new(),
                snapshot_lru: Lru::new(),
                baselines: HashMap::new(),
                baseline_lru: Lru::new(),
                latest_url: None,
            }),
        }
    }

    /// Install a new snapshot, evicting the LRU snapshot if at cap, and
    /// update the URL's running baseline. Returns the baseline as it stood
    /// *before* this push, for the regression detector to compare against.
    pub fn add_snapshot(&self, snap: PerformanceSnapshot) -> Option<PerformanceBaseline> {
        let mut inner = self.inner.write().unwrap();
        let url = snap.url.clone();

        if !inner.snapshots.contains_key(&url) && inner.snapshot_lru.len() >= SNAPSHOT_CAP {
            if let Some(evicted) = inner.snapshot_lru.evict_oldest() {
                inner.snapshots.remove(&evicted);
            }
        }
        inner.snapshot_lru.touch(&url);
        inner.latest_url = Some(url.clone());

        let baseline_before = inner.baselines.get(&url).cloned();

        if !inner.baselines.contains_key(&url) && inner.baseline_lru.len() >= BASELINE_CAP {
            if let Some(evicted) = inner.baseline_lru.evict_oldest() {
                inner.baselines.remove(&evicted);
            }
        }
        inner.baseline_lru.touch(&url);
        let updated = update_baseline(baseline_before.as_ref(), &snap);
        inner.baselines.insert(url.clone(), updated);
        inner.snapshots.insert(url, snap);

        baseline_before
    }

    pub fn baseline(&self, url: &str) -> Option<PerformanceBaseline> {
        self.inner.read().unwrap().baselines.get(url).cloned()
    }

    pub fn snapshot(&self, url: &str) -> Option<PerformanceSnapshot> {
        self.inner.read().unwrap().snapshots.get(url).cloned()
    }

    pub fn latest_snapshot(&self) -> Option<PerformanceSnapshot> {
        let inner = self.inner.read().unwrap();
        inner
            .latest_url
            .as_ref()
            .and_then(|url| inner.snapshots.get(url).cloned())
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.snapshots.clear();
        inner.snapshot_lru = Lru::new();
        inner.baselines.clear();
        inner.baseline_lru = Lru::new();
        inner.latest_url = None;
    }
}

impl Default for PerformanceStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Average two values with weight determined by `sample_count` per §4.4:
/// equal-weighted for the first four samples, then an 80/20 exponential
/// moving average.
fn averaged(baseline: f64, snap: f64, sample_count: u32) -> f64 {
    if sample_count < 5 {
        let n = sample_count as f64;
        baseline * (n - 1.0) / n + snap / n
    } else {
        0.8 * baseline + 0.2 * snap
    }
}

fn averaged_opt(baseline: Option<f64>, snap: Option<f64>, sample_count: u32) -> Option<f64> {
    match (baseline, snap) {
        (Some(b), Some(s)) => Some(averaged(b, s, sample_count)),
        (None, Some(s)) => Some(s),
        (Some(b), None) => Some(b),
        (None, None) => None,
    }
}

fn update_baseline(
    existing: Option<&PerformanceBaseline>,
    snap: &PerformanceSnapshot,
) -> PerformanceBaseline {
    let now = Utc::now().to_rfc3339();
    let existing = match existing {
        None => {
            let mut resources = snap.resources.clone();
            resources.sort_by(|a, b| b.transfer_size.cmp(&a.transfer_size));
            resources.truncate(50);
            return PerformanceBaseline {
                sample_count: 1,
                last_updated: now,
                timing: snap.timing.clone(),
                network: snap.network.clone(),
                long_tasks: snap.long_tasks.clone(),
                cls: snap.cls,
                resources,
            };
        }
        Some(e) => e,
    };

    let n = existing.sample_count + 1;
    let timing = Timing {
        load: averaged(existing.timing.load, snap.timing.load, n),
        dom_content_loaded: averaged(
            existing.timing.dom_content_loaded,
            snap.timing.dom_content_loaded,
            n,
        ),
        dom_interactive: averaged(
            existing.timing.dom_interactive,
            snap.timing.dom_interactive,
            n,
        ),
        time_to_first_byte: averaged(
            existing.timing.time_to_first_byte,
            snap.timing.time_to_first_byte,
            n,
        ),
        first_contentful_paint: averaged_opt(
            existing.timing.first_contentful_paint,
            snap.timing.first_contentful_paint,
            n,
        ),
        largest_contentful_paint: averaged_opt(
            existing.timing.largest_contentful_paint,
            snap.timing.largest_contentful_paint,
            n,
        ),
        interaction_to_next_paint: averaged_opt(
            existing.timing.interaction_to_next_paint,
            snap.timing.interaction_to_next_paint,
            n,
        ),
    };
    let network = NetworkSummary {
        request_count: averaged(
            existing.network.request_count as f64,
            snap.network.request_count as f64,
            n,
        ) as u32,
        transfer_size: averaged(
            existing.network.transfer_size as f64,
            snap.network.transfer_size as f64,
            n,
        ) as u64,
        decoded_size: averaged(
            existing.network.decoded_size as f64,
            snap.network.decoded_size as f64,
            n,
        ) as u64,
        slowest_requests: snap.network.slowest_requests.clone(),
    };
    let long_tasks = crate::types::LongTasks {
        count: averaged(existing.long_tasks.count as f64, snap.long_tasks.count as f64, n) as u32,
        total_blocking_time: averaged(
            existing.long_tasks.total_blocking_time,
            snap.long_tasks.total_blocking_time,
            n,
        ),
        longest: averaged(existing.long_tasks.longest, snap.long_tasks.longest, n),
    };
    let cls = averaged_opt(existing.cls, snap.cls, n);
    let resources = merge_resources(&existing.resources, &snap.resources, n);

    PerformanceBaseline {
        sample_count: n,
        last_updated: now,
        timing,
        network,
        long_tasks,
        cls,
        resources,
    }
}

fn merge_resources(baseline: &[Resource], snap: &[Resource], n: u32) -> Vec<Resource> {
    let mut merged: Vec<Resource> = Vec::with_capacity(baseline.len());
    let mut seen = std::collections::HashSet::new();
    for b in baseline {
        let key = normalize_resource_url(&b.url);
        let matched = snap
            .iter()
            .find(|s| normalize_resource_url(&s.url) == key);
        match matched {
            Some(s) => {
                merged.push(Resource {
                    url: b.url.clone(),
                    resource_type: s.resource_type.clone(),
                    transfer_size: averaged(b.transfer_size as f64, s.transfer_size as f64, n)
                        as u64,
                    duration: averaged(b.duration, s.duration, n),
                    render_blocking: s.render_blocking,
                });
            }
            None => merged.push(b.clone()),
        }
        seen.insert(key);
    }
    for s in snap {
        let key = normalize_resource_url(&s.url);
        if !seen.contains(&key) {
            merged.push(s.clone());
            seen.insert(key);
        }
    }
    merged.sort_by(|a, b| b.transfer_size.cmp(&a.transfer_size));
    merged.truncate(50);
    merged
}
