//! Daemon readiness probes and the pool watchdog.
//!
//! Probes block until the daemon answers. They impose no timeout of their
//! own; the only way out besides success is the stop signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::pool::PoolExecutor;
use crate::target::ControlSocket;

/// Default poll interval of both probes.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(3);

/// Sleep for `interval`, returning `false` if `stop` fired first.
async fn pause(interval: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        changed = stop.changed() => changed.is_ok() && !*stop.borrow(),
    }
}

/// Poll `zpool status` until it exits 0.
///
/// Returns `false` when stopped before the tool became ready.
pub async fn wait_for_pool_tool(
    pool: &PoolExecutor,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> bool {
    loop {
        match pool.status().await {
            Ok(_) => {
                info!("Pool tool is ready");
                return true;
            }
            Err(e) => {
                warn!(error = %e, "Pool tool not ready, waiting for the pool daemon to start");
            }
        }
        if !pause(interval, &mut stop).await {
            return false;
        }
    }
}

/// Poll the istgt control socket with `STATUS` until it answers without error.
pub async fn wait_for_istgt(
    socket: &ControlSocket,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> bool {
    loop {
        match socket.status().await {
            Ok(reply) => {
                info!(reply = %reply, "istgt is ready");
                return true;
            }
            Err(e) => {
                warn!(error = %e, socket = %socket.path().display(), "istgt not ready");
            }
        }
        if !pause(interval, &mut stop).await {
            return false;
        }
    }
}

/// Why the pool watchdog returned.
#[derive(Debug)]
pub enum WatchdogExit {
    /// The pool tool failed outright.
    ToolFailed(EngineError),
    /// A pool had been brought up and has since disappeared.
    PoolsGone,
    Stopped,
}

/// Watch the pool tool after start-up.
///
/// `pool_added` flips once the first pool `Add` succeeds; from then on an
/// empty `zpool status` means the pool vanished underneath us.
pub async fn pool_watchdog(
    pool: &PoolExecutor,
    interval: Duration,
    pool_added: Arc<AtomicBool>,
    mut stop: watch::Receiver<bool>,
) -> WatchdogExit {
    loop {
        match pool.status().await {
            Ok(status) if pool_added.load(Ordering::SeqCst) && status.no_pools() => {
                warn!("Pool disappeared after it was brought up");
                return WatchdogExit::PoolsGone;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Pool tool health check failed");
                return WatchdogExit::ToolFailed(e);
            }
        }
        if !pause(interval, &mut stop).await {
            return WatchdogExit::Stopped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedRunner;
    use crate::runner::CommandOutput;

    #[tokio::test(start_paused = true)]
    async fn test_pool_probe_retries_until_ready() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .script("zpool status", CommandOutput::failed(1, "connection refused"))
            .script("zpool status", CommandOutput::failed(1, "connection refused"))
            .script("zpool status", CommandOutput::ok("no pools available"));
        let pool = PoolExecutor::new(runner.clone());
        let (_tx, rx) = watch::channel(false);

        assert!(wait_for_pool_tool(&pool, PROBE_INTERVAL, rx).await);
        assert_eq!(runner.count("zpool status"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_exits_on_stop() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("zpool status", CommandOutput::failed(1, "down"));
        let pool = PoolExecutor::new(runner);
        let (tx, rx) = watch::channel(false);

        let probe = tokio::spawn(async move { wait_for_pool_tool(&pool, PROBE_INTERVAL, rx).await });
        tx.send(true).unwrap();
        assert!(!probe.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_only_after_pool_added() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("zpool status", CommandOutput::ok("no pools available\n"));
        let pool = PoolExecutor::new(runner.clone());
        let added = Arc::new(AtomicBool::new(false));
        let (_tx, rx) = watch::channel(false);

        let flag = added.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let exit = pool_watchdog(&pool, PROBE_INTERVAL, added, rx).await;
        assert!(matches!(exit, WatchdogExit::PoolsGone));
        assert!(runner.count("zpool status") > 1);
    }
}
