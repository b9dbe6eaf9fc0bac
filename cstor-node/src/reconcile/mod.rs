//! Worker loop shared by every reconciler.
//!
//! ```text
//! queue.get() ──► lookup (tombstone, then store) ──► Reconciler::reconcile
//!      ▲                                                   │
//!      │                 status write (unless Ignore) ◄────┘
//!      │                                                   │
//!      └──── add_rate_limited (retryable error) ◄──────────┤
//!                            forget (success) ◄────────────┘
//! ```

mod pool;
mod replica;
mod volume;

pub use pool::PoolReconciler;
pub use replica::{ReplicaReconciler, ReplicaSettings};
pub use volume::VolumeReconciler;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{CStorResource, Phase};
use crate::error::ReconcileError;
use crate::queue::{Operation, QueueItem, WorkQueue};
use crate::store::{write_phase, ResourceStore};
use crate::tombstone::TombstoneIndex;

/// Result of one reconcile: the phase to record and whether it worked.
#[derive(Debug)]
pub struct Outcome {
    pub phase: Phase,
    pub result: Result<(), ReconcileError>,
}

impl Outcome {
    pub fn ok(phase: Phase) -> Self {
        Self {
            phase,
            result: Ok(()),
        }
    }

    pub fn failed(phase: Phase, error: impl Into<ReconcileError>) -> Self {
        Self {
            phase,
            result: Err(error.into()),
        }
    }

    /// Nothing to do and nothing to record.
    pub fn ignore() -> Self {
        Self::ok(Phase::Ignore)
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    fn message(&self) -> Option<String> {
        self.result.as_ref().err().map(|e| e.to_string())
    }
}

/// Drives one kind of resource toward its declared state.
#[async_trait]
pub trait Reconciler<K>: Send + Sync {
    async fn reconcile(&self, op: Operation, obj: &K) -> Outcome;
}

/// Calls [`WorkQueue::done`] when dropped, including during unwinding.
struct DoneGuard<'a> {
    queue: &'a WorkQueue<QueueItem>,
    item: &'a QueueItem,
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.queue.done(self.item);
    }
}

/// Worker pool for one reconciler.
pub struct Controller<K> {
    name: &'static str,
    queue: Arc<WorkQueue<QueueItem>>,
    store: Arc<dyn ResourceStore<K>>,
    tombstones: Arc<TombstoneIndex<K>>,
    reconciler: Arc<dyn Reconciler<K>>,
}

impl<K: CStorResource> Controller<K> {
    pub fn new(
        name: &'static str,
        queue: Arc<WorkQueue<QueueItem>>,
        store: Arc<dyn ResourceStore<K>>,
        tombstones: Arc<TombstoneIndex<K>>,
        reconciler: Arc<dyn Reconciler<K>>,
    ) -> Self {
        Self {
            name,
            queue,
            store,
            tombstones,
            reconciler,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn queue(&self) -> &Arc<WorkQueue<QueueItem>> {
        &self.queue
    }

    /// Launch `workers` worker tasks.
    pub fn spawn_workers(self: &Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers.max(1))
            .map(|id| {
                let controller = Arc::clone(self);
                tokio::spawn(async move { controller.run_worker(id).await })
            })
            .collect()
    }

    /// Process items until the queue shuts down.
    pub async fn run_worker(self: Arc<Self>, id: usize) {
        info!(controller = self.name, worker = id, "Worker started");
        while self.process_next().await {}
        info!(controller = self.name, worker = id, "Worker stopped");
    }

    /// Take one item and handle it. Returns `false` once the queue is shut down.
    pub async fn process_next(&self) -> bool {
        match self.queue.get().await {
            Some(item) => {
                self.handle(&item).await;
                true
            }
            None => false,
        }
    }

    #[instrument(skip_all, fields(controller = self.name, key = %item.key, op = %item.operation))]
    async fn handle(&self, item: &QueueItem) {
        let _done = DoneGuard {
            queue: &self.queue,
            item,
        };

        let tombstone = match item.operation {
            Operation::Destroy => self.tombstones.take(&item.key),
            _ => None,
        };

        let result = AssertUnwindSafe(self.sync(item, tombstone.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ReconcileError::Panicked(panic_message(panic))));

        match result {
            Ok(()) => {
                debug!("Reconciled");
                self.queue.forget(item);
            }
            Err(ReconcileError::NotFound(_)) => {
                info!("Resource no longer exists, dropping");
                self.queue.forget(item);
            }
            Err(e) if e.is_retryable() => {
                if let Some(obj) = tombstone {
                    self.tombstones.restore(&item.key, obj);
                }
                error!(error = %e, retries = self.queue.num_requeues(item), "Reconcile failed, requeueing");
                self.queue.add_rate_limited(item.clone());
            }
            Err(e) => {
                warn!(error = %e, "Reconcile failed permanently, not retrying");
                self.queue.forget(item);
            }
        }
    }

    async fn sync(&self, item: &QueueItem, tombstone: Option<K>) -> Result<(), ReconcileError> {
        let obj = match tombstone {
            Some(obj) => Some(obj),
            None => self.store.get(&item.key).await?,
        };

        let Some(obj) = obj else {
            if item.operation == Operation::Destroy {
                info!("Nothing left to destroy");
                return Ok(());
            }
            return Err(ReconcileError::NotFound(item.key.clone()));
        };

        let outcome = self.reconciler.reconcile(item.operation, &obj).await;

        if outcome.phase.writes_status() {
            info!(phase = %outcome.phase, "Updating status");
            if let Err(e) = write_phase(&*self.store, &item.key, outcome.phase, outcome.message()).await {
                warn!(error = %e, "Status update failed");
                if outcome.is_ok() {
                    return Err(e.into());
                }
            }
        }

        outcome.result
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CStorVolumeReplica, CStorVolumeReplicaSpec};
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Scripted {
        calls: AtomicUsize,
        panic_first: bool,
    }

    #[async_trait]
    impl Reconciler<CStorVolumeReplica> for Scripted {
        async fn reconcile(&self, _op: Operation, _obj: &CStorVolumeReplica) -> Outcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_first && n == 0 {
                panic!("boom");
            }
            Outcome::ok(Phase::Online)
        }
    }

    fn setup(panic_first: bool) -> (Arc<Controller<CStorVolumeReplica>>, Arc<MemoryStore<CStorVolumeReplica>>, Arc<Scripted>) {
        let store = Arc::new(MemoryStore::new());
        let mut cvr = CStorVolumeReplica::new("r1", CStorVolumeReplicaSpec::default());
        cvr.metadata.namespace = Some("openebs".into());
        store.insert(cvr);

        let reconciler = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            panic_first,
        });
        let controller = Arc::new(Controller::<CStorVolumeReplica>::new(
            "replica",
            Arc::new(WorkQueue::new("replica")),
            store.clone(),
            Arc::new(TombstoneIndex::new()),
            reconciler.clone(),
        ));
        (controller, store, reconciler)
    }

    #[tokio::test]
    async fn test_success_writes_status_and_forgets() {
        let (controller, store, _) = setup(false);
        controller.queue().add(QueueItem::new("openebs/r1", Operation::Add));

        assert!(controller.process_next().await);
        assert_eq!(store.phase("openebs/r1"), Some(Phase::Online));
        assert_eq!(controller.queue().num_requeues(&QueueItem::new("openebs/r1", Operation::Add)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_releases_key_and_requeues() {
        let (controller, store, reconciler) = setup(true);
        let item = QueueItem::new("openebs/r1", Operation::Add);
        controller.queue().add(item.clone());

        assert!(controller.process_next().await);
        assert_eq!(store.phase("openebs/r1"), None);
        assert_eq!(controller.queue().num_requeues(&item), 1);

        // The key was released, so the back-off re-add reaches a worker.
        let next = tokio::time::timeout(Duration::from_secs(1), controller.process_next()).await;
        assert_eq!(next.ok(), Some(true));
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.phase("openebs/r1"), Some(Phase::Online));
    }

    #[tokio::test]
    async fn test_missing_resource_is_forgotten() {
        let (controller, _, reconciler) = setup(false);
        controller.queue().add(QueueItem::new("openebs/missing", Operation::Modify));

        assert!(controller.process_next().await);
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 0);
        assert!(controller.queue().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers() {
        let (controller, _, _) = setup(false);
        let handles = controller.spawn_workers(2);
        controller.queue().shut_down();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
