//! State shared between the pool and replica reconcilers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use cstor_engine::DatasetInfo;
use tracing::info;

/// Datasets that existed when the pool was first brought up on this node.
///
/// Written once by the first successful pool `Add`; read-only afterwards.
#[derive(Clone, Default)]
pub struct ImportedVolumes {
    inner: Arc<RwLock<Option<Vec<DatasetInfo>>>>,
    pool_added: Arc<AtomicBool>,
}

impl ImportedVolumes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the snapshot. Later calls are ignored.
    pub fn record(&self, datasets: Vec<DatasetInfo>) -> bool {
        let mut slot = self.inner.write().unwrap_or_else(|p| p.into_inner());
        self.pool_added.store(true, Ordering::SeqCst);
        if slot.is_some() {
            return false;
        }
        info!(count = datasets.len(), "Recorded pre-existing datasets");
        *slot = Some(datasets);
        true
    }

    pub fn is_recorded(&self) -> bool {
        self.inner.read().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn snapshot(&self) -> Vec<DatasetInfo> {
        self.inner
            .read()
            .map(|s| s.clone().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Whether `<pool>/<vol>` was present before this process managed the pool.
    pub fn contains(&self, fq_name: &str) -> bool {
        self.inner
            .read()
            .map(|s| s.as_ref().map_or(false, |v| v.iter().any(|d| d.name == fq_name)))
            .unwrap_or(false)
    }

    /// Flag raised once a pool has been brought up; watched by the pool watchdog.
    pub fn pool_added_flag(&self) -> Arc<AtomicBool> {
        self.pool_added.clone()
    }
}
