//! CStorPool reconciler: import or create the pool, destroy it on delete.

use std::sync::Arc;

use async_trait::async_trait;
use cstor_engine::{DatasetExecutor, EngineError, ImportOutcome, PoolDefinition, PoolExecutor};
use kube::Resource;
use tracing::{info, instrument, warn};

use super::{Outcome, Reconciler};
use crate::context::ImportedVolumes;
use crate::crd::{CStorPool, Phase};
use crate::events::{reason, EventKind, EventSink};
use crate::queue::Operation;

pub struct PoolReconciler {
    pools: Arc<PoolExecutor>,
    datasets: Arc<DatasetExecutor>,
    imported: ImportedVolumes,
    events: Arc<dyn EventSink>,
}

impl PoolReconciler {
    pub fn new(
        pools: Arc<PoolExecutor>,
        datasets: Arc<DatasetExecutor>,
        imported: ImportedVolumes,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            pools,
            datasets,
            imported,
            events,
        }
    }

    /// Whether the declared pool is already active on this node.
    async fn already_active(&self, def: &PoolDefinition) -> bool {
        match self.pools.current_pool_name().await {
            Ok(name) => name.as_deref() == Some(def.pool_name.as_str()),
            Err(e) => {
                warn!(error = %e, "Could not read pool status, assuming no pool is active");
                false
            }
        }
    }

    /// Import, falling back to create, then snapshot the datasets already present.
    async fn bring_up(&self, def: &PoolDefinition) -> Result<&'static str, EngineError> {
        self.pools.validate(def)?;

        if self.already_active(def).await {
            info!(pool = %def.pool_name, "Pool already imported");
            let datasets = self.datasets.list(&def.pool_name).await?;
            self.imported.record(datasets);
            return Ok(reason::IMPORTED);
        }

        let reason = match self.pools.import(def).await? {
            ImportOutcome::Imported => {
                info!(pool = %def.pool_name, "Pool imported");
                reason::IMPORTED
            }
            ImportOutcome::NotPresent => {
                info!(pool = %def.pool_name, "Pool not found on disks, creating");
                self.pools.create(def).await?;
                reason::CREATED
            }
        };

        let datasets = self.datasets.list(&def.pool_name).await?;
        self.imported.record(datasets);
        Ok(reason)
    }

    async fn add(&self, pool: &CStorPool) -> Outcome {
        let def = pool.definition();
        let object = pool.object_ref(&());

        match self.bring_up(&def).await {
            Ok(reason) => {
                self.events
                    .record(object, EventKind::Normal, reason, format!("Pool {} is online", def.pool_name))
                    .await;
                Outcome::ok(Phase::Online)
            }
            Err(e) => {
                let reason = match &e {
                    EngineError::InvalidSpec(_) => reason::INVALID,
                    _ => reason::FAILED_CREATE,
                };
                self.events
                    .record(object, EventKind::Warning, reason, e.to_string())
                    .await;
                Outcome::failed(Phase::Offline, e)
            }
        }
    }

    async fn destroy(&self, pool: &CStorPool) -> Outcome {
        let def = pool.definition();
        let object = pool.object_ref(&());

        if let Err(e) = self.pools.destroy(&def.pool_name).await {
            self.events
                .record(object, EventKind::Warning, reason::FAILED_DESTROY, e.to_string())
                .await;
            return Outcome::failed(Phase::DeletionFailed, e);
        }

        for disk in &def.disks {
            if let Err(e) = self.pools.label_clear(disk).await {
                warn!(disk = %disk, error = %e, "Label clear failed");
            }
        }

        self.events
            .record(object, EventKind::Normal, reason::DESTROYED, format!("Pool {} destroyed", def.pool_name))
            .await;
        Outcome::ignore()
    }
}

#[async_trait]
impl Reconciler<CStorPool> for PoolReconciler {
    #[instrument(skip_all, fields(pool = %obj.spec.pool_spec.pool_name, op = %op))]
    async fn reconcile(&self, op: Operation, obj: &CStorPool) -> Outcome {
        match op {
            Operation::Add => self.add(obj).await,
            Operation::Destroy => self.destroy(obj).await,
            // Pool identity is immutable once created.
            Operation::Modify | Operation::PeriodicSync => Outcome::ignore(),
        }
    }
}
