//! Per-category ingestion buffers (§4.2).
//!
//! Each category is a bounded ring paired with a parallel insertion-time
//! array and a monotonic total-added counter. The counter never resets and
//! is the sole anchor checkpoints use to resolve a point in time to a
//! buffer position (§9, "time-to-position mapping").

use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::types::{ConsoleEntry, EnhancedAction, NetworkBody, WebSocketEvent};

/// A single bounded ring buffer with parallel insertion timestamps.
pub struct RingBuffer<T> {
    entries: Vec<T>,
    insertion_times: Vec<DateTime<Utc>>,
    total_added: u64,
    max: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(max: usize) -> Self {
        RingBuffer {
            entries: Vec::new(),
            insertion_times: Vec::new(),
            total_added: 0,
            max,
        }
    }

    /// Append a batch, all sharing the same insertion timestamp, then evict
    /// from the front until the ring is back within `max`.
    pub fn add(&mut self, batch: Vec<T>, now: DateTime<Utc>) {
        let n = batch.len();
        if n == 0 {
            return;
        }
        self.entries.extend(batch);
        self.insertion_times
            .extend(std::iter::repeat(now).take(n));
        self.total_added += n as u64;
        if self.entries.len() > self.max {
            let drop_n = self.entries.len() - self.max;
            self.entries.drain(0..drop_n);
            self.insertion_times.drain(0..drop_n);
        }
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn total_added(&self) -> u64 {
        self.total_added
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a wall-clock time to a buffer position: the monotonic total
    /// as of the first entry strictly after `t`. Clamped to 0. Best-effort
    /// once entries before `t` have been evicted — see §4.6.
    pub fn position_at(&self, t: DateTime<Utc>) -> u64 {
        let idx = self.insertion_times.partition_point(|ts| *ts <= t);
        let remaining_after = self.insertion_times.len() - idx;
        self.total_added.saturating_sub(remaining_after as u64)
    }

    /// Last `n` entries, clamped to however many currently survive in the
    /// ring (best-effort per §4.6).
    pub fn last(&self, n: u64) -> &[T] {
        let n = (n as usize).min(self.entries.len());
        &self.entries[self.entries.len() - n..]
    }
}

pub struct IngestionBuffers {
    pub console: RwLock<RingBuffer<ConsoleEntry>>,
    pub network: RwLock<RingBuffer<NetworkBody>>,
    pub websocket: RwLock<RingBuffer<WebSocketEvent>>,
    pub action: RwLock<RingBuffer<EnhancedAction>>,
}

pub const CONSOLE_CAP: usize = 1000;
pub const ACTION_CAP: usize = 50;

impl IngestionBuffers {
    pub fn new(network_cap: usize, websocket_cap: usize) -> Self {
        IngestionBuffers {
            console: RwLock::new(RingBuffer::new(CONSOLE_CAP)),
            network: RwLock::new(RingBuffer::new(network_cap)),
            websocket: RwLock::new(RingBuffer::new(websocket_cap)),
            action: RwLock::new(RingBuffer::new(ACTION_CAP)),
        }
    }

    pub fn add_console(&self, batch: Vec<ConsoleEntry>) {
        let now = Utc::now();
        self.console.write().unwrap().add(batch, now);
    }

    pub fn add_network(&self, batch: Vec<NetworkBody>) {
        let now = Utc::now();
        self.network.write().unwrap().add(batch, now);
    }

    pub fn add_websocket(&self, batch: Vec<WebSocketEvent>) {
        let now = Utc::now();
        self.websocket.write().unwrap().add(batch, now);
    }

    /// Password redaction happens here, on ingest, before the batch ever
    /// reaches the ring (§4.2).
    pub fn add_actions(&self, mut batch: Vec<EnhancedAction>) {
        for action in &mut batch {
            action.redact_password();
        }
        let now = Utc::now();
        self.action.write().unwrap().add(batch, now);
    }

    pub fn totals(&self) -> (u64, u64, u64, u64) {
        (
            self.console.read().unwrap().total_added(),
            self.network.read().unwrap().total_added(),
            self.websocket.read().unwrap().total_added(),
            self.action.read().unwrap().total_added(),
        )
    }
}
