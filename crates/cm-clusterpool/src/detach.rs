//! Detach a managed cluster from a hub

use cm_applier::{ResourceClient, ValueMapping};
use cm_common::{Error, Result};
use tracing::info;

use crate::accept::managed_cluster_ref;

/// Cluster name from `--name`, falling back to `managedCluster.name`
pub fn resolve_cluster(name: Option<&str>, values: Option<&ValueMapping>) -> Result<String> {
    name.or_else(|| values.and_then(|v| v.get_str("managedCluster.name")))
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::validation("values or name are missing"))
}

/// Delete the cluster's `ManagedCluster` on the hub.
///
/// Returns `false` when it was already gone.
pub async fn detach_cluster(hub: &dyn ResourceClient, cluster: &str) -> Result<bool> {
    let r = managed_cluster_ref(cluster);
    match hub.delete(&r).await {
        Ok(()) => {
            info!(cluster, "managed cluster detached");
            Ok(true)
        }
        Err(e) if e.is_not_found() => {
            info!(cluster, "managed cluster already detached");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
