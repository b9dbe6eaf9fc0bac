//! # cstor-pool-mgmt
//!
//! Runs next to the pool daemon on a storage node. Imports or creates the
//! node's CStorPool and carves CStorVolumeReplica volumes out of it.
//!
//! ## Usage
//! ```bash
//! cstor-pool-mgmt start --kubeconfig ~/.kube/config
//! ```

use std::sync::Arc;

use anyhow::Result;
use futures::FutureExt;
use tracing::info;

use cstor_common::{env, LogFormat};
use cstor_engine::{wait_for_pool_tool, CommandRunner, DatasetExecutor, HostRunner, PoolExecutor};
use cstor_node::cli::{Cli, Command};
use cstor_node::crd::POOL_UID_LABEL;
use cstor_node::events::{EventSink, KubeEventSink};
use cstor_node::ingest::{DeletePolicy, IdentityGate};
use cstor_node::reconcile::{PoolReconciler, ReplicaReconciler};
use cstor_node::store::KubeStore;
use cstor_node::supervisor::{install_signal_handler, watch_pool, KindRuntime, Supervisor};
use cstor_node::{client, CStorPool, CStorResource, CStorVolumeReplica, Config, ImportedVolumes};

const NAME: &str = "cstor-pool-mgmt";

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        command: Command::Start(args),
    } = Cli::parse_as(NAME, "Reconciles cStor pools and volume replicas on this node");

    let config = Config::resolve(&args)?;
    cstor_common::init(&config.logging.level, LogFormat::from_json_flag(config.logging.json))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting {}", NAME);
    config.log_summary();

    let stop = install_signal_handler()?;
    let client = client::build(args.kubeconfig.as_deref()).await?;

    let runner: Arc<dyn CommandRunner> = Arc::new(HostRunner::new());
    let pools = Arc::new(PoolExecutor::with_tool(runner.clone(), config.pool.pool_tool.clone()));
    let datasets = Arc::new(DatasetExecutor::with_tool(runner, config.pool.dataset_tool.clone()));
    let imported = ImportedVolumes::new();
    let events: Arc<dyn EventSink> = Arc::new(KubeEventSink::new(client.clone(), NAME));
    let store = Arc::new(KubeStore::new(client.clone()));

    let pool_id = env::lookup(env::CSTOR_POOL_ID);
    if let Some(ref id) = pool_id {
        info!(pool_uid = %id, "Bound to a single CStorPool");
    }
    let replica_gate = match pool_id.clone() {
        Some(uid) => IdentityGate::Label {
            key: POOL_UID_LABEL.to_string(),
            value: uid,
        },
        None => IdentityGate::Open,
    };

    let pool_kind = KindRuntime::<CStorPool>::new(
        "CStorPool",
        CStorPool::api(client.clone(), None),
        store.clone(),
        Arc::new(PoolReconciler::new(
            pools.clone(),
            datasets.clone(),
            imported.clone(),
            events.clone(),
        )),
        IdentityGate::uid_or_open(pool_id),
        DeletePolicy::Enqueue,
    );

    let replica_kind = KindRuntime::<CStorVolumeReplica>::new(
        "CStorVolumeReplica",
        CStorVolumeReplica::api(client.clone(), config.controller.namespace()),
        store,
        Arc::new(ReplicaReconciler::new(
            pools.clone(),
            datasets,
            imported.clone(),
            events,
            config.pool.replica_settings(),
        )),
        replica_gate,
        DeletePolicy::Enqueue,
    );

    let probe = wait_for_pool_tool(&pools, config.pool.probe_interval(), stop.clone());
    let watchdog = watch_pool(
        pools.clone(),
        config.pool.watchdog_interval(),
        imported.pool_added_flag(),
        stop.clone(),
    )
    .boxed();

    Supervisor::new(NAME, config.controller.clone())
        .manage(pool_kind)
        .manage(replica_kind)
        .run(probe, watchdog, stop)
        .await
}
