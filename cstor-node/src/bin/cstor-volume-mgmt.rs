//! # cstor-volume-mgmt
//!
//! Sidecar of the istgt target pod. Keeps istgt.conf in line with the one
//! CStorVolume named by `OPENEBS_IO_CSTOR_VOLUME_ID`.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::FutureExt;
use tracing::info;

use cstor_common::{env, LogFormat};
use cstor_engine::{wait_for_istgt, HostRunner, TargetManager};
use cstor_node::cli::{Cli, Command};
use cstor_node::events::KubeEventSink;
use cstor_node::ingest::{DeletePolicy, IdentityGate};
use cstor_node::reconcile::VolumeReconciler;
use cstor_node::store::KubeStore;
use cstor_node::supervisor::{install_signal_handler, KindRuntime, Supervisor};
use cstor_node::{client, CStorResource, CStorVolume, Config};

const NAME: &str = "cstor-volume-mgmt";

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        command: Command::Start(args),
    } = Cli::parse_as(NAME, "Maintains the istgt target configuration for one CStorVolume");

    let config = Config::resolve(&args)?;
    cstor_common::init(&config.logging.level, LogFormat::from_json_flag(config.logging.json))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting {}", NAME);
    config.log_summary();

    let identity = env::lookup(env::CSTOR_VOLUME_ID)
        .ok_or_else(|| anyhow!("{} must be set for the volume sidecar", env::CSTOR_VOLUME_ID))?;
    info!(volume_uid = %identity, "Bound to a single CStorVolume");

    let stop = install_signal_handler()?;
    let client = client::build(args.kubeconfig.as_deref()).await?;

    let target = Arc::new(TargetManager::new(Arc::new(HostRunner::new()), config.target.paths()));

    let volume_kind = KindRuntime::<CStorVolume>::new(
        "CStorVolume",
        CStorVolume::api(client.clone(), config.controller.namespace()),
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(VolumeReconciler::new(
            target.clone(),
            Arc::new(KubeEventSink::new(client, NAME)),
        )),
        IdentityGate::sidecar(identity),
        DeletePolicy::LogOnly,
    );

    let probe = wait_for_istgt(target.socket(), config.target.probe_interval(), stop.clone());

    Supervisor::new(NAME, config.controller.clone())
        .manage(volume_kind)
        .run(probe, futures::future::pending().boxed(), stop)
        .await
}
