//! Canonical resource store: fetch by key and write status.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use kube::api::PostParams;
use kube::Client;
use tracing::debug;

use crate::crd::{object_key, split_key, CStorResource, Phase};
use crate::error::StoreError;

/// Read and status-write access to one resource kind.
#[async_trait]
pub trait ResourceStore<K>: Send + Sync {
    /// Current object for `key`, or `None` when it no longer exists.
    async fn get(&self, key: &str) -> Result<Option<K>, StoreError>;

    /// Replace the status subresource with the one carried by `obj`.
    async fn replace_status(&self, obj: &K) -> Result<(), StoreError>;
}

/// Read-modify-write of `.status.phase`.
///
/// A resource that vanished in the meantime is not an error.
pub async fn write_phase<K, S>(
    store: &S,
    key: &str,
    phase: Phase,
    message: Option<String>,
) -> Result<(), StoreError>
where
    K: CStorResource,
    S: ResourceStore<K> + ?Sized,
{
    let Some(mut latest) = store.get(key).await? else {
        debug!(key, "Resource gone before status write");
        return Ok(());
    };
    latest.set_phase(phase, Utc::now(), message);
    match store.replace_status(&latest).await {
        Err(StoreError::NotFound(_)) => Ok(()),
        other => other,
    }
}

// ============================================================================
// API server backed store
// ============================================================================

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<K: CStorResource> ResourceStore<K> for KubeStore {
    async fn get(&self, key: &str) -> Result<Option<K>, StoreError> {
        let (namespace, name) = split_key(key);
        let api = K::api(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace_status(&self, obj: &K) -> Result<(), StoreError> {
        let key = object_key(obj);
        let (namespace, name) = split_key(&key);
        let api = K::api(self.client.clone(), namespace);
        let body = serde_json::to_vec(obj).map_err(|e| StoreError::Internal(e.to_string()))?;

        match api.replace_status(name, &PostParams::default(), body).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(StoreError::NotFound(key)),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store backed by a map, for tests and dry runs.
pub struct MemoryStore<K> {
    objects: Mutex<HashMap<String, K>>,
    status_writes: Mutex<Vec<(String, Option<Phase>)>>,
}

impl<K: CStorResource> MemoryStore<K> {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            status_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, obj: K) {
        let key = object_key(&obj);
        self.objects.lock().unwrap_or_else(|p| p.into_inner()).insert(key, obj);
    }

    pub fn remove(&self, key: &str) -> Option<K> {
        self.objects.lock().unwrap_or_else(|p| p.into_inner()).remove(key)
    }

    pub fn object(&self, key: &str) -> Option<K> {
        self.objects.lock().unwrap_or_else(|p| p.into_inner()).get(key).cloned()
    }

    pub fn phase(&self, key: &str) -> Option<Phase> {
        self.object(key).and_then(|o| o.phase())
    }

    /// Every status write so far as `(key, phase)`.
    pub fn status_writes(&self) -> Vec<(String, Option<Phase>)> {
        self.status_writes.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl<K: CStorResource> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: CStorResource> ResourceStore<K> for MemoryStore<K> {
    async fn get(&self, key: &str) -> Result<Option<K>, StoreError> {
        Ok(self.object(key))
    }

    async fn replace_status(&self, obj: &K) -> Result<(), StoreError> {
        let key = object_key(obj);
        let mut objects = self.objects.lock().unwrap_or_else(|p| p.into_inner());
        if !objects.contains_key(&key) {
            return Err(StoreError::NotFound(key));
        }
        objects.insert(key.clone(), obj.clone());
        drop(objects);

        self.status_writes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((key, obj.phase()));
        Ok(())
    }
}
