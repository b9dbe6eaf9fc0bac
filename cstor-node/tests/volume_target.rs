//! CStorVolume sidecar: gate, validation and the full istgt apply.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cstor_engine::{CommandRunner, ScriptedRunner, TargetManager, TargetPaths};
use cstor_node::crd::CStorVolumeSpec;
use cstor_node::events::MemoryEventSink;
use cstor_node::informer::{Event, EventHandler};
use cstor_node::ingest::{DeletePolicy, EventIngest, IdentityGate};
use cstor_node::reconcile::{Controller, VolumeReconciler};
use cstor_node::store::MemoryStore;
use cstor_node::tombstone::TombstoneIndex;
use cstor_node::{CStorVolume, Phase, WorkQueue};

const KEY: &str = "openebs/v1";

fn volume(consistency_factor: u32) -> CStorVolume {
    let mut cv = CStorVolume::new(
        "v1",
        CStorVolumeSpec {
            volume_name: "v1".into(),
            capacity: "5G".into(),
            target_ip: "10.0.0.1".into(),
            replication_factor: 3,
            consistency_factor,
            ..Default::default()
        },
    );
    cv.metadata.namespace = Some("openebs".into());
    cv.metadata.uid = Some("x".into());
    cv.metadata.resource_version = Some("1".into());
    cv
}

fn paths(dir: &Path) -> TargetPaths {
    TargetPaths {
        config_path: dir.join("etc/istgt/istgt.conf"),
        socket_path: dir.join("istgt_ctl_sock"),
        backing_dir: dir.join("cstor"),
        socket_timeout: Duration::from_secs(2),
    }
}

struct Sidecar {
    ingest: EventIngest<CStorVolume>,
    controller: Controller<CStorVolume>,
    store: Arc<MemoryStore<CStorVolume>>,
}

fn sidecar(identity: &str, runner: Arc<dyn CommandRunner>, paths: TargetPaths) -> Sidecar {
    let target = Arc::new(TargetManager::new(runner, paths));
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(WorkQueue::new("CStorVolume"));
    let tombstones = Arc::new(TombstoneIndex::new());
    let ingest = EventIngest::new(
        "CStorVolume",
        queue.clone(),
        tombstones.clone(),
        IdentityGate::sidecar(identity),
        DeletePolicy::LogOnly,
    );
    let controller = Controller::<CStorVolume>::new(
        "CStorVolume",
        queue,
        store.clone(),
        tombstones,
        Arc::new(VolumeReconciler::new(target, Arc::new(MemoryEventSink::new()))),
    );
    Sidecar {
        ingest,
        controller,
        store,
    }
}

#[tokio::test]
async fn test_zero_consistency_factor_goes_offline() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let paths = paths(dir.path());
    let s = sidecar("x", runner.clone(), paths.clone());

    s.store.insert(volume(0));
    s.ingest.on_event(Event::Add(volume(0)));
    assert!(s.controller.process_next().await);

    assert_eq!(s.store.phase(KEY), Some(Phase::Offline));
    assert!(!paths.config_path.exists());
    assert!(runner.calls().is_empty());
    let message = s.store.object(KEY).unwrap().status.unwrap().message.unwrap();
    assert!(message.contains("consistencyFactor"));
}

#[tokio::test]
async fn test_foreign_volume_is_dropped_at_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let paths = paths(dir.path());
    let s = sidecar("y", runner.clone(), paths.clone());

    s.ingest.on_event(Event::Add(volume(2)));
    s.ingest.on_event(Event::Update {
        old: volume(2),
        new: volume(2),
    });

    assert!(s.controller.queue().is_empty());
    assert!(!paths.config_path.exists());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_volume_delete_is_log_only() {
    let dir = tempfile::tempdir().unwrap();
    let s = sidecar("x", Arc::new(ScriptedRunner::new()), paths(dir.path()));

    s.ingest.on_event(Event::Delete(volume(2)));
    assert!(s.controller.queue().is_empty());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_add_writes_config_and_refreshes() {
    use std::os::unix::fs::PermissionsExt;

    use cstor_engine::HostRunner;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    let dir = tempfile::tempdir().unwrap();
    let paths = paths(dir.path());
    let listener = UnixListener::bind(&paths.socket_path).unwrap();
    let daemon = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut line = String::new();
        BufReader::new(read).read_line(&mut line).await.unwrap();
        write.write_all(b"OK\n").await.unwrap();
        line
    });

    let s = sidecar("x", Arc::new(HostRunner::new()), paths.clone());
    s.store.insert(volume(2));
    s.ingest.on_event(Event::Add(volume(2)));
    assert!(s.controller.process_next().await);

    assert_eq!(s.store.phase(KEY), Some(Phase::Online));

    let backing = std::fs::metadata(paths.backing_dir.join("v1")).unwrap();
    assert_eq!(backing.len(), 5 * 1024 * 1024 * 1024);

    let conf = std::fs::read_to_string(&paths.config_path).unwrap();
    for expected in [
        "Portal DA1 10.0.0.1:3260",
        "TargetName v1",
        "ReplicationFactor 3",
        "ConsistencyFactor 2",
    ] {
        assert!(conf.contains(expected), "missing {expected:?}");
    }
    let storage = format!("LUN0 Storage {}/v1 5G 32k", paths.backing_dir.display());
    assert!(conf.contains(&storage));

    let mode = std::fs::metadata(&paths.config_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o644);

    assert_eq!(daemon.await.unwrap(), "REFRESH\n");
}
