//! Per-peer key-value store for state attached by higher layers.

use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Value stored under a metadata key.
pub type DataValue = Arc<dyn Any + Send + Sync>;

/// Thread-safe string-keyed store. Last writer wins per key; there is no
/// atomicity across keys.
#[derive(Default)]
pub struct PeerData {
    entries: DashMap<String, DataValue>,
}

impl PeerData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// Raw value under `key`.
    pub fn get(&self, key: &str) -> Option<DataValue> {
        self.entries.get(key).map(|v| Arc::clone(v.value()))
    }

    /// Value under `key` if it has type `T`.
    pub fn get_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get(key).and_then(|v| v.downcast::<T>().ok())
    }

    pub fn remove(&self, key: &str) -> Option<DataValue> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PeerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("PeerData").field("keys", &keys).finish()
    }
}
