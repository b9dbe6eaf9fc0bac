//! CStorVolume reconciler: keep istgt.conf in line with the volume.

use std::sync::Arc;

use async_trait::async_trait;
use cstor_engine::TargetManager;
use kube::Resource;
use tracing::{info, instrument, warn};

use super::{Outcome, Reconciler};
use crate::crd::{CStorVolume, Phase};
use crate::events::{reason, EventKind, EventSink};
use crate::queue::Operation;

pub struct VolumeReconciler {
    target: Arc<TargetManager>,
    events: Arc<dyn EventSink>,
}

impl VolumeReconciler {
    pub fn new(target: Arc<TargetManager>, events: Arc<dyn EventSink>) -> Self {
        Self { target, events }
    }

    async fn apply(&self, op: Operation, cv: &CStorVolume) -> Outcome {
        let def = cv.target();
        let object = cv.object_ref(&());

        if let Err(e) = def.validate() {
            warn!(error = %e, "Volume failed validation");
            self.events
                .record(object, EventKind::Warning, reason::INVALID, e.to_string())
                .await;
            let phase = if op == Operation::Add { Phase::Offline } else { Phase::Invalid };
            return Outcome::failed(phase, e);
        }

        let written = async {
            self.target.ensure_backing_file(&def).await?;
            self.target.write_config(&def).await
        };
        if let Err(e) = written.await {
            self.events
                .record(object, EventKind::Warning, reason::FAILED_SYNC, e.to_string())
                .await;
            return Outcome::failed(Phase::Failed, e);
        }

        if !self.target.refresh().await {
            info!("Daemon not refreshed; it will pick up the configuration on restart");
        }

        self.events
            .record(object, EventKind::Normal, reason::SYNCED, format!("Target {} configured", def.volume_name))
            .await;
        Outcome::ok(Phase::Online)
    }
}

#[async_trait]
impl Reconciler<CStorVolume> for VolumeReconciler {
    #[instrument(skip_all, fields(volume = %obj.spec.volume_name, op = %op))]
    async fn reconcile(&self, op: Operation, obj: &CStorVolume) -> Outcome {
        match op {
            Operation::Add | Operation::Modify => self.apply(op, obj).await,
            // The backing file and the LU entry are left in place on delete.
            Operation::Destroy => Outcome::ignore(),
            Operation::PeriodicSync => Outcome::ignore(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::CStorVolumeSpec;
    use crate::error::ReconcileError;
    use crate::events::MemoryEventSink;
    use cstor_engine::{CommandOutput, ScriptedRunner, TargetPaths};
    use std::time::Duration;

    fn cv(consistency: u32) -> CStorVolume {
        let mut cv = CStorVolume::new(
            "v1",
            CStorVolumeSpec {
                volume_name: "v1".into(),
                capacity: "5G".into(),
                target_ip: "10.0.0.1".into(),
                replication_factor: 3,
                consistency_factor: consistency,
                ..Default::default()
            },
        );
        cv.metadata.namespace = Some("openebs".into());
        cv.metadata.uid = Some("x".into());
        cv
    }

    fn reconciler(runner: Arc<ScriptedRunner>, dir: &std::path::Path) -> VolumeReconciler {
        let paths = TargetPaths {
            config_path: dir.join("istgt.conf"),
            socket_path: dir.join("istgt.sock"),
            backing_dir: dir.join("cstor"),
            socket_timeout: Duration::from_millis(200),
        };
        VolumeReconciler::new(
            Arc::new(TargetManager::new(runner, paths)),
            Arc::new(MemoryEventSink::new()),
        )
    }

    #[tokio::test]
    async fn test_invalid_phase_depends_on_operation() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let r = reconciler(runner.clone(), dir.path());

        let add = r.reconcile(Operation::Add, &cv(0)).await;
        assert_eq!(add.phase, Phase::Offline);
        assert!(matches!(add.result, Err(ReconcileError::InvalidSpec(_))));

        let modify = r.reconcile(Operation::Modify, &cv(0)).await;
        assert_eq!(modify.phase, Phase::Invalid);

        assert!(runner.calls().is_empty());
        assert!(!dir.path().join("istgt.conf").exists());
    }

    #[tokio::test]
    async fn test_backing_file_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.script_prefix("touch", CommandOutput::failed(1, "read-only file system"));
        let r = reconciler(runner, dir.path());

        let outcome = r.reconcile(Operation::Add, &cv(2)).await;
        assert_eq!(outcome.phase, Phase::Failed);
        assert!(outcome.result.as_ref().is_err_and(|e| e.is_retryable()));
        assert!(!dir.path().join("istgt.conf").exists());
    }

    #[tokio::test]
    async fn test_apply_without_daemon_still_online() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.fallback(CommandOutput::ok(""));
        let r = reconciler(runner, dir.path());

        let outcome = r.reconcile(Operation::Modify, &cv(2)).await;
        assert_eq!(outcome.phase, Phase::Online);
        let conf = std::fs::read_to_string(dir.path().join("istgt.conf")).unwrap();
        assert!(conf.contains("ConsistencyFactor 2"));
    }

    #[tokio::test]
    async fn test_destroy_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let r = reconciler(runner.clone(), dir.path());

        assert_eq!(r.reconcile(Operation::Destroy, &cv(2)).await.phase, Phase::Ignore);
        assert!(runner.calls().is_empty());
    }
}
