//! Interface-only collaborator boundaries (§6).
//!
//! The core never depends on these beyond the trait contract: persistent
//! session storage and extension-side console ingestion both live outside
//! the telemetry core and are reachable only through the interfaces here.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::types::ConsoleEntry;

/// Scoped key-value persistence for session state. The core does not
/// implement this; a real implementation would back it with an on-disk
/// format (out of scope, §1).
pub trait SessionStore: Send + Sync {
    fn save(&self, namespace: &str, key: &str, value: &str) -> Result<(), String>;
    fn load(&self, namespace: &str, key: &str) -> Result<Option<String>, String>;
    fn list(&self, namespace: &str) -> Result<Vec<String>, String>;
    fn delete(&self, namespace: &str, key: &str) -> Result<(), String>;
}

/// Test double. Never used outside `#[cfg(test)]` — no persistence
/// guarantees, process-lifetime only.
#[derive(Default)]
pub struct InMemorySessionStore {
    data: Mutex<HashMap<(String, String), String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn save(&self, namespace: &str, key: &str, value: &str) -> Result<(), String> {
        self.data
            .lock()
            .map_err(|_| "poisoned".to_string())?
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn load(&self, namespace: &str, key: &str) -> Result<Option<String>, String> {
        Ok(self
            .data
            .lock()
            .map_err(|_| "poisoned".to_string())?
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn list(&self, namespace: &str) -> Result<Vec<String>, String> {
        Ok(self
            .data
            .lock()
            .map_err(|_| "poisoned".to_string())?
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, k)| k.clone())
            .collect())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), String> {
        self.data
            .lock()
            .map_err(|_| "poisoned".to_string())?
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

/// A console log source that appends entries with parallel `added_at`
/// timestamps (§6 boundary contract). `IngestionBuffers::add_console`
/// satisfies this; declared separately so the contract is checkable on its
/// own, independent of the ring buffer's internal representation.
pub trait ConsoleIngestHook: Send + Sync {
    fn ingest(&self, entries: Vec<ConsoleEntry>, added_at: DateTime<Utc>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_namespace_and_key() {
        let store = InMemorySessionStore::new();
        store.save("sessions", "abc", "{\"step\":1}").unwrap();
        assert_eq!(
            store.load("sessions", "abc").unwrap(),
            Some("{\"step\":1}".to_string())
        );
        assert_eq!(store.list("sessions").unwrap(), vec!["abc".to_string()]);
        store.delete("sessions", "abc").unwrap();
        assert_eq!(store.load("sessions", "abc").unwrap(), None);
    }

    #[test]
    fn namespaces_are_isolated() {
        let store = InMemorySessionStore::new();
        store.save("a", "k", "1").unwrap();
        store.save("b", "k", "2").unwrap();
        assert_eq!(store.load("a", "k").unwrap(), Some("1".to_string()));
        assert_eq!(store.load("b", "k").unwrap(), Some("2".to_string()));
    }
}
