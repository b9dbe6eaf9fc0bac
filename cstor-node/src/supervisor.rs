//! Process lifecycle: signals, daemon probes, informers, workers, shutdown.
//!
//! Start order:
//! 1. signal handler (first SIGTERM/SIGINT stops, the second exits)
//! 2. daemon probe (blocks until the daemon answers)
//! 3. wait for every watched kind to be served by the API server
//! 4. informers, then wait for their caches to sync
//! 5. worker tasks per reconciler
//! 6. block until stopped or the watchdog trips
//! 7. shut the queues down and drain in-flight workers

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use cstor_engine::{pool_watchdog, PoolExecutor, WatchdogExit};
use futures::future::{join_all, BoxFuture};
use kube::api::ListParams;
use kube::Api;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ControllerConfig;
use crate::crd::CStorResource;
use crate::informer::{Cache, EventHandler, Informer};
use crate::ingest::{DeletePolicy, EventIngest, IdentityGate};
use crate::queue::WorkQueue;
use crate::reconcile::{Controller, Reconciler};
use crate::store::ResourceStore;
use crate::tombstone::TombstoneIndex;

/// Interval between cache sync checks.
const SYNC_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Signals
// ============================================================================

/// Install SIGTERM/SIGINT handling and return the stop channel.
///
/// The first signal flips the channel to `true`; a second one exits the
/// process immediately.
pub fn install_signal_handler() -> Result<watch::Receiver<bool>> {
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut received = false;
        loop {
            let name = tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
            };
            if received {
                warn!(signal = name, "Second signal received, exiting immediately");
                std::process::exit(1);
            }
            received = true;
            info!(signal = name, "Shutdown signal received");
            let _ = tx.send(true);
        }
    });

    Ok(rx)
}

/// Resolves once `stop` reads `true` or its sender is gone.
pub async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            break;
        }
    }
}

// ============================================================================
// Managed kinds
// ============================================================================

/// Everything the supervisor drives for one resource kind.
#[async_trait]
pub trait ManagedKind: Send + Sync {
    fn kind(&self) -> &'static str;

    /// List the kind until the API server serves it. `false` if stopped first.
    async fn wait_until_served(&self, retry: Duration, stop: watch::Receiver<bool>) -> bool;

    fn start_informer(&self, resync: Duration, stop: watch::Receiver<bool>) -> JoinHandle<()>;

    fn is_synced(&self) -> bool;

    fn start_workers(&self, workers: usize) -> Vec<JoinHandle<()>>;

    /// Stop handing out queue items; workers exit after their current one.
    fn shut_down(&self);
}

/// Informer, ingest, queue and workers for one kind.
pub struct KindRuntime<K> {
    kind: &'static str,
    api: Api<K>,
    cache: Arc<Cache<K>>,
    ingest: Arc<EventIngest<K>>,
    controller: Arc<Controller<K>>,
}

impl<K: CStorResource> KindRuntime<K> {
    pub fn new(
        kind: &'static str,
        api: Api<K>,
        store: Arc<dyn ResourceStore<K>>,
        reconciler: Arc<dyn Reconciler<K>>,
        gate: IdentityGate,
        deletes: DeletePolicy,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new(kind));
        let tombstones = Arc::new(TombstoneIndex::new());
        let ingest = Arc::new(EventIngest::new(kind, queue.clone(), tombstones.clone(), gate, deletes));
        let controller = Arc::new(Controller::new(kind, queue, store, tombstones, reconciler));
        Self {
            kind,
            api,
            cache: Arc::new(Cache::new()),
            ingest,
            controller,
        }
    }

    pub fn controller(&self) -> &Arc<Controller<K>> {
        &self.controller
    }
}

#[async_trait]
impl<K: CStorResource> ManagedKind for KindRuntime<K> {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn wait_until_served(&self, retry: Duration, stop: watch::Receiver<bool>) -> bool {
        loop {
            match self.api.list(&ListParams::default().limit(1)).await {
                Ok(_) => return true,
                Err(e) => warn!(kind = self.kind, error = %e, "Resource not served yet, retrying"),
            }
            tokio::select! {
                _ = tokio::time::sleep(retry) => {}
                _ = stopped(stop.clone()) => return false,
            }
        }
    }

    fn start_informer(&self, resync: Duration, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let handler: Arc<dyn EventHandler<K>> = self.ingest.clone();
        let informer = Informer::new(self.kind, self.api.clone(), self.cache.clone(), handler, resync);
        tokio::spawn(informer.run(stop))
    }

    fn is_synced(&self) -> bool {
        self.cache.is_synced()
    }

    fn start_workers(&self, workers: usize) -> Vec<JoinHandle<()>> {
        self.controller.spawn_workers(workers)
    }

    fn shut_down(&self) {
        self.controller.queue().shut_down();
    }
}

// ============================================================================
// Supervisor
// ============================================================================

pub struct Supervisor {
    name: &'static str,
    settings: ControllerConfig,
    kinds: Vec<Box<dyn ManagedKind>>,
}

impl Supervisor {
    pub fn new(name: &'static str, settings: ControllerConfig) -> Self {
        Self {
            name,
            settings,
            kinds: Vec::new(),
        }
    }

    pub fn manage(mut self, kind: impl ManagedKind + 'static) -> Self {
        self.kinds.push(Box::new(kind));
        self
    }

    /// Run until `stop` fires or `watchdog` resolves.
    ///
    /// `probe` gates everything else; a `false` from it means stop arrived
    /// before the daemon was ready. A watchdog error is returned as-is so the
    /// binary exits non-zero.
    pub async fn run<P>(
        self,
        probe: P,
        watchdog: BoxFuture<'_, Result<()>>,
        stop: watch::Receiver<bool>,
    ) -> Result<()>
    where
        P: Future<Output = bool>,
    {
        info!(supervisor = self.name, kinds = self.kinds.len(), "Waiting for daemon");
        if !probe.await {
            info!("Stopped before the daemon became ready");
            return Ok(());
        }

        for kind in &self.kinds {
            if !kind.wait_until_served(self.settings.crd_retry(), stop.clone()).await {
                return Ok(());
            }
        }

        let informers: Vec<JoinHandle<()>> = self
            .kinds
            .iter()
            .map(|k| k.start_informer(self.settings.resync(), stop.clone()))
            .collect();

        match self.wait_for_sync(stop.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                self.drain(Vec::new(), informers).await;
                return Ok(());
            }
            Err(e) => {
                self.drain(Vec::new(), informers).await;
                return Err(e);
            }
        }

        let mut workers = Vec::new();
        for kind in &self.kinds {
            info!(kind = kind.kind(), workers = self.settings.workers, "Starting workers");
            workers.extend(kind.start_workers(self.settings.workers));
        }
        info!(supervisor = self.name, "Controllers running");

        let result = tokio::select! {
            _ = stopped(stop.clone()) => Ok(()),
            outcome = watchdog => match outcome {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!(error = %e, "Watchdog tripped, shutting down");
                    Err(e)
                }
            },
        };

        self.drain(workers, informers).await;
        result
    }

    /// `Ok(false)` if stopped while waiting; an error once the timeout expires.
    async fn wait_for_sync(&self, stop: watch::Receiver<bool>) -> Result<bool> {
        let timeout = self.settings.cache_sync_timeout();
        let all_synced = async {
            while !self.kinds.iter().all(|k| k.is_synced()) {
                tokio::time::sleep(SYNC_POLL).await;
            }
        };

        tokio::select! {
            synced = tokio::time::timeout(timeout, all_synced) => match synced {
                Ok(()) => {
                    info!("Caches synced");
                    Ok(true)
                }
                Err(_) => {
                    let pending: Vec<&str> = self
                        .kinds
                        .iter()
                        .filter(|k| !k.is_synced())
                        .map(|k| k.kind())
                        .collect();
                    Err(anyhow!("caches did not sync within {:?}: {}", timeout, pending.join(", ")))
                }
            },
            _ = stopped(stop) => Ok(false),
        }
    }

    async fn drain(&self, workers: Vec<JoinHandle<()>>, informers: Vec<JoinHandle<()>>) {
        for kind in &self.kinds {
            kind.shut_down();
        }
        for joined in join_all(workers).await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }
        for informer in informers {
            informer.abort();
        }
        info!(supervisor = self.name, "Shut down");
    }
}

// ============================================================================
// Pool watchdog
// ============================================================================

/// Wait for the first pool to come up, then watch it.
///
/// Resolves `Ok` on stop and `Err` when the pool tool fails or the pool
/// vanishes, which should end the process.
pub async fn watch_pool(
    pools: Arc<PoolExecutor>,
    interval: Duration,
    pool_added: Arc<AtomicBool>,
    stop: watch::Receiver<bool>,
) -> Result<()> {
    while !pool_added.load(Ordering::SeqCst) {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stopped(stop.clone()) => return Ok(()),
        }
    }

    info!("Pool is up, starting watchdog");
    match pool_watchdog(&pools, interval, pool_added, stop).await {
        WatchdogExit::Stopped => Ok(()),
        WatchdogExit::PoolsGone => Err(anyhow!("pool disappeared after it was brought up")),
        WatchdogExit::ToolFailed(e) => Err(anyhow!(e).context("pool tool failed")),
    }
}
