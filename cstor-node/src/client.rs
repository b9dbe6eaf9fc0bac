//! Control-plane client construction.

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::info;

/// Build a client from `kubeconfig` when given, else from in-cluster or default discovery.
pub async fn build(kubeconfig: Option<&str>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig: {}", path))?;
            let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("Invalid kubeconfig: {}", path))?;
            info!(kubeconfig = %path, cluster = %config.cluster_url, "Using kubeconfig");
            Client::try_from(config).context("Failed to build Kubernetes client")
        }
        None => {
            info!("No kubeconfig given, using in-cluster configuration");
            Client::try_default()
                .await
                .context("Failed to build Kubernetes client from in-cluster configuration")
        }
    }
}
