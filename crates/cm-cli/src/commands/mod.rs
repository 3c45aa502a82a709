//! CLI commands

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use cm_applier::{KubeResourceClient, ResourceClient, ValueMapping};
use cm_clusterpool::{ClusterPoolHost, ClusterPoolHosts};
use cm_common::kube_utils::create_client;
use tracing::debug;

use crate::{Error, Result};

pub mod accept;
pub mod attach;
pub mod clusterpoolhost;
pub mod detach;
pub mod join;
pub mod power;
pub mod scale;

/// Flags selecting the cluster a scenario runs against
#[derive(Args, Debug, Clone, Default)]
pub struct ClusterFlags {
    /// Path to the kubeconfig file
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,
}

impl ClusterFlags {
    /// Client for the selected cluster
    pub async fn client(&self) -> Result<Arc<dyn ResourceClient>> {
        // KUBECONFIG may list several files; kube resolves that itself
        let path = self
            .kubeconfig
            .as_deref()
            .filter(|p| std::env::split_paths(p.as_os_str()).count() == 1);
        let client = create_client(path, self.context.as_deref()).await?;
        Ok(Arc::new(KubeResourceClient::new(client)))
    }
}

/// Registry of cluster pool hosts at its default location
pub fn load_hosts() -> Result<(PathBuf, ClusterPoolHosts)> {
    let path = ClusterPoolHosts::default_path()?;
    let hosts = ClusterPoolHosts::load(&path)?;
    Ok((path, hosts))
}

/// The named cluster pool host (or the current one) and a client for it
pub async fn pool_client(
    cph: Option<&str>,
) -> Result<(ClusterPoolHost, Arc<dyn ResourceClient>)> {
    let (_, hosts) = load_hosts()?;
    let host = hosts.get_or_current(cph)?.clone();
    debug!(host = %host.name, context = host.kube_context(), "connecting to cluster pool host");
    let client = create_client(None, Some(host.kube_context())).await?;
    Ok((host, Arc::new(KubeResourceClient::new(client))))
}

/// Read a values file when one was given
pub fn load_values(path: Option<&Path>) -> Result<Option<ValueMapping>> {
    path.map(ValueMapping::from_file)
        .transpose()
        .map_err(Error::from)
}
