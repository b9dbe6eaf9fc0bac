//! # cstor-repl-ctrl
//!
//! Replica controller for nodes whose pool is managed elsewhere. Snapshots
//! the datasets already in the active pool at start-up, then creates thin
//! volumes for new CStorVolumeReplicas.

use std::sync::Arc;

use anyhow::Result;
use futures::FutureExt;
use tracing::{info, warn};

use cstor_common::LogFormat;
use cstor_engine::{wait_for_pool_tool, CommandRunner, DatasetExecutor, HostRunner, PoolExecutor};
use cstor_node::cli::{Cli, Command};
use cstor_node::events::KubeEventSink;
use cstor_node::ingest::{DeletePolicy, IdentityGate};
use cstor_node::reconcile::ReplicaReconciler;
use cstor_node::store::KubeStore;
use cstor_node::supervisor::{install_signal_handler, KindRuntime, Supervisor};
use cstor_node::{client, CStorResource, CStorVolumeReplica, Config, ImportedVolumes};

const NAME: &str = "cstor-repl-ctrl";

/// Record the datasets of whatever pool is active right now.
async fn snapshot_datasets(pools: &PoolExecutor, datasets: &DatasetExecutor, imported: &ImportedVolumes) {
    match pools.current_pool_name().await {
        Ok(Some(pool)) => match datasets.list(&pool).await {
            Ok(found) => {
                imported.record(found);
            }
            Err(e) => warn!(pool = %pool, error = %e, "Could not list existing datasets"),
        },
        Ok(None) => info!("No pool active yet, nothing to snapshot"),
        Err(e) => warn!(error = %e, "Could not resolve the active pool"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        command: Command::Start(args),
    } = Cli::parse_as(NAME, "Creates thin volumes for cStor volume replicas in the active pool");

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

    let replica_kind = KindRuntime::<CStorVolumeReplica>::new(
        "CStorVolumeReplica",
        CStorVolumeReplica::api(client.clone(), config.controller.namespace()),
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(ReplicaReconciler::new(
            pools.clone(),
            datasets.clone(),
            imported.clone(),
            Arc::new(KubeEventSink::new(client, NAME)),
            config.pool.replica_settings(),
        )),
        IdentityGate::Open,
        DeletePolicy::Enqueue,
    );

    let probe_stop = stop.clone();
    let probe = async {
        if !wait_for_pool_tool(&pools, config.pool.probe_interval(), probe_stop).await {
            return false;
        }
        snapshot_datasets(&pools, &datasets, &imported).await;
        true
    };

    Supervisor::new(NAME, config.controller.clone())
        .manage(replica_kind)
        .run(probe, futures::future::pending().boxed(), stop)
        .await
}
