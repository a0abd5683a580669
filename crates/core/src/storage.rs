//! Durable key/value storage contract for the queue and the mode preference.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::errors::{Result, StorageError};

/// Storage key of the serialized mutation queue.
pub const MUTATION_QUEUE_KEY: &str = "offline_mutation_queue";

/// Storage key of the user's online/offline mode preference.
pub const ONLINE_MODE_KEY: &str = "offline_sync_online_mode";

const STORE_CHANGE_CAPACITY: usize = 64;

/// Advisory notice that a key was overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
}

/// Key/value storage that survives restarts.
///
/// `save` replaces the whole value of a key atomically from the caller's
/// point of view: after an `Err` the previous value is still in place.
pub trait PersistentStore: Send + Sync {
    fn save(&self, key: &str, value: &str) -> std::result::Result<(), StorageError>;

    fn load(&self, key: &str) -> std::result::Result<Option<String>, StorageError>;

    /// Change feed for multi-view UIs. Stores without one return `None`.
    fn subscribe(&self) -> Option<broadcast::Receiver<StoreChange>> {
        None
    }
}

pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn PersistentStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(value)?;
    store.save(key, &json)?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(store: &dyn PersistentStore, key: &str) -> Result<Option<T>> {
    match store.load(key)? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// In-process store, optionally capped at a number of bytes across all values.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    capacity_bytes: Option<usize>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(STORE_CHANGE_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity_bytes: None,
            changes,
        }
    }

    pub fn with_capacity_bytes(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes: Some(capacity_bytes),
            ..Self::new()
        }
    }

    /// Bytes currently held across all keys.
    pub fn used_bytes(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.values().map(String::len).sum())
            .unwrap_or(0)
    }
}

impl PersistentStore for MemoryStore {
    fn save(&self, key: &str, value: &str) -> std::result::Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::unavailable("memory store lock is poisoned"))?;

        if let Some(capacity) = self.capacity_bytes {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            let needed = others + value.len();
            if needed > capacity {
                return Err(StorageError::quota_exceeded(format!(
                    "{} bytes needed, capacity is {} bytes",
                    needed, capacity
                )));
            }
        }

        entries.insert(key.to_string(), value.to_string());
        drop(entries);

        // No receivers is fine.
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
        });
        Ok(())
    }

    fn load(&self, key: &str) -> std::result::Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::unavailable("memory store lock is poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreChange>> {
        Some(self.changes.subscribe())
    }
}
