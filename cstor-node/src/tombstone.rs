//! Last-known payloads of deleted resources.
//!
//! A deleted object is already gone from the cache and the API server by
//! the time its `Destroy` item is processed. The delete callback stashes it
//! here under its queue key; the worker takes it back out.

use std::collections::HashMap;
use std::sync::Mutex;

pub struct TombstoneIndex<K> {
    entries: Mutex<HashMap<String, K>>,
}

impl<K: Clone> TombstoneIndex<K> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Remember the payload of a deleted object, replacing any older one.
    pub fn stash(&self, key: &str, obj: K) {
        self.lock().insert(key.to_string(), obj);
    }

    /// Remove and return the payload.
    pub fn take(&self, key: &str) -> Option<K> {
        self.lock().remove(key)
    }

    /// Put a payload back after a failed reconcile so the retry finds it.
    /// A newer stash wins over the restored one.
    pub fn restore(&self, key: &str, obj: K) {
        self.lock().entry(key.to_string()).or_insert(obj);
    }

    pub fn get(&self, key: &str) -> Option<K> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, K>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl<K: Clone> Default for TombstoneIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}
