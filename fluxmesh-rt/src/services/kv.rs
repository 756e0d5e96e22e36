// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;

/// Named value store shared by the components of one flow.
///
/// Intra-flow coordination without leaking state into sibling flows.
#[derive(Default)]
pub struct KeyValueStore {
    entries: DashMap<String, Value>,
}

impl KeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn set(&self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|(_, value)| value)
    }
}

/// Named async locks shared by the components of one flow.
#[derive(Default)]
pub struct LockManager {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (creating on first use) the named lock.
    pub fn get_lock(&self, name: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            &self
                .locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}
