//! CStorVolumeReplica reconciler: carve a thin volume out of the active pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cstor_engine::{qualified_name, DatasetExecutor, PoolExecutor};
use kube::Resource;
use tracing::{debug, info, instrument};

use super::{Outcome, Reconciler};
use crate::context::ImportedVolumes;
use crate::crd::{CStorVolumeReplica, Phase};
use crate::error::ReconcileError;
use crate::events::{reason, EventKind, EventSink};
use crate::queue::Operation;

/// How long to wait for a pool to show up before giving up on a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaSettings {
    pub pool_name_attempts: u32,
    pub pool_name_interval: Duration,
}

impl Default for ReplicaSettings {
    fn default() -> Self {
        Self {
            pool_name_attempts: 10,
            pool_name_interval: Duration::from_secs(5),
        }
    }
}

pub struct ReplicaReconciler {
    pools: Arc<PoolExecutor>,
    datasets: Arc<DatasetExecutor>,
    imported: ImportedVolumes,
    events: Arc<dyn EventSink>,
    settings: ReplicaSettings,
}

impl ReplicaReconciler {
    pub fn new(
        pools: Arc<PoolExecutor>,
        datasets: Arc<DatasetExecutor>,
        imported: ImportedVolumes,
        events: Arc<dyn EventSink>,
        settings: ReplicaSettings,
    ) -> Self {
        Self {
            pools,
            datasets,
            imported,
            events,
            settings,
        }
    }

    fn validate(cvr: &CStorVolumeReplica) -> Result<(), ReconcileError> {
        if cvr.spec.vol_name.trim().is_empty() {
            return Err(ReconcileError::InvalidSpec("volName cannot be empty".into()));
        }
        if cvr.spec.capacity.trim().is_empty() {
            return Err(ReconcileError::InvalidSpec("capacity cannot be empty".into()));
        }
        Ok(())
    }

    /// Poll the pool tool until a pool is active, up to the configured attempts.
    async fn resolve_pool_name(&self) -> Result<String, ReconcileError> {
        let attempts = self.settings.pool_name_attempts.max(1);
        for attempt in 1..=attempts {
            match self.pools.current_pool_name().await {
                Ok(Some(name)) => return Ok(name),
                Ok(None) => debug!(attempt, "No pool active yet"),
                Err(e) => debug!(attempt, error = %e, "Pool status unavailable"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.pool_name_interval).await;
            }
        }
        Err(ReconcileError::PoolUnavailable { attempts })
    }

    async fn create(&self, cvr: &CStorVolumeReplica) -> Result<&'static str, ReconcileError> {
        Self::validate(cvr)?;

        let pool_name = self.resolve_pool_name().await?;
        let fq_name = qualified_name(&pool_name, &cvr.spec.vol_name);

        if self.imported.contains(&fq_name) {
            info!(dataset = %fq_name, "Dataset existed before pool import, skipping create");
            return Ok(reason::IMPORTED);
        }

        self.datasets
            .create_thin_volume(&fq_name, &cvr.spec.capacity)
            .await?;
        info!(dataset = %fq_name, capacity = %cvr.spec.capacity, "Replica volume created");
        Ok(reason::CREATED)
    }
}

#[async_trait]
impl Reconciler<CStorVolumeReplica> for ReplicaReconciler {
    #[instrument(skip_all, fields(vol = %obj.spec.vol_name, op = %op, pool_guid = obj.pool_guid().unwrap_or("-")))]
    async fn reconcile(&self, op: Operation, obj: &CStorVolumeReplica) -> Outcome {
        if op != Operation::Add {
            return Outcome::ignore();
        }

        let object = obj.object_ref(&());
        match self.create(obj).await {
            Ok(reason) => {
                self.events
                    .record(object, EventKind::Normal, reason, format!("Replica {} is online", obj.spec.vol_name))
                    .await;
                Outcome::ok(Phase::Online)
            }
            Err(e) => {
                let reason = match &e {
                    ReconcileError::InvalidSpec(_) => reason::INVALID,
                    _ => reason::FAILED_CREATE,
                };
                self.events
                    .record(object, EventKind::Warning, reason, e.to_string())
                    .await;
                Outcome::failed(Phase::Offline, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::CStorVolumeReplicaSpec;
    use crate::events::MemoryEventSink;
    use cstor_engine::{CommandOutput, DatasetInfo, ScriptedRunner};

    fn cvr(vol: &str, capacity: &str) -> CStorVolumeReplica {
        let mut cvr = CStorVolumeReplica::new(
            "cvr-1",
            CStorVolumeReplicaSpec {
                vol_name: vol.into(),
                capacity: capacity.into(),
                target_ip: "10.0.0.1".into(),
            },
        );
        cvr.metadata.namespace = Some("openebs".into());
        cvr
    }

    fn reconciler(runner: &Arc<ScriptedRunner>, imported: ImportedVolumes, attempts: u32) -> ReplicaReconciler {
        ReplicaReconciler::new(
            Arc::new(PoolExecutor::new(runner.clone())),
            Arc::new(DatasetExecutor::new(runner.clone())),
            imported,
            Arc::new(MemoryEventSink::new()),
            ReplicaSettings {
                pool_name_attempts: attempts,
                pool_name_interval: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_validation_runs_before_any_tool() {
        let runner = Arc::new(ScriptedRunner::new());
        let r = reconciler(&runner, ImportedVolumes::new(), 1);

        for bad in [cvr("", "100M"), cvr("vol1", "")] {
            let outcome = r.reconcile(Operation::Add, &bad).await;
            assert_eq!(outcome.phase, Phase::Offline);
            assert!(matches!(outcome.result, Err(ReconcileError::InvalidSpec(_))));
        }
        assert!(runner.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_poll_gives_up_after_attempts() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("zpool status", CommandOutput::ok("no pools available"));
        let r = reconciler(&runner, ImportedVolumes::new(), 3);

        let started = tokio::time::Instant::now();
        let outcome = r.reconcile(Operation::Add, &cvr("vol1", "100M")).await;

        assert_eq!(outcome.phase, Phase::Offline);
        assert!(matches!(outcome.result, Err(ReconcileError::PoolUnavailable { attempts: 3 })));
        assert_eq!(runner.count("zpool status"), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(15));
        assert!(!runner.ran_prefix("zfs create"));
    }

    #[tokio::test]
    async fn test_preexisting_dataset_is_not_recreated() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("zpool status", CommandOutput::ok("  pool: cp1\n state: ONLINE\n"));
        let imported = ImportedVolumes::new();
        imported.record(vec![DatasetInfo {
            name: "cp1/vol1".into(),
            volsize: "100M".into(),
        }]);
        let r = reconciler(&runner, imported, 1);

        let outcome = r.reconcile(Operation::Add, &cvr("vol1", "100M")).await;
        assert_eq!(outcome.phase, Phase::Online);
        assert!(!runner.ran_prefix("zfs create"));
    }

    #[tokio::test]
    async fn test_other_operations_are_noops() {
        let runner = Arc::new(ScriptedRunner::new());
        let r = reconciler(&runner, ImportedVolumes::new(), 1);

        for op in [Operation::Modify, Operation::PeriodicSync, Operation::Destroy] {
            assert_eq!(r.reconcile(op, &cvr("vol1", "100M")).await.phase, Phase::Ignore);
        }
        assert!(runner.calls().is_empty());
    }
}
