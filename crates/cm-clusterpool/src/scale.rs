//! Scale a cluster's worker pool

use cm_applier::{ResourceClient, ValueMapping};
use cm_common::kube_utils::ResourceRef;
use cm_common::{Error, Result};
use serde_json::json;
use tracing::info;

use crate::claim::HIVE_API_VERSION;

/// Flag value meaning "replicas not given"
pub const UNSET_REPLICAS: i64 = -1;

/// Validated input of a scale request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleValues {
    /// Cluster whose workers are scaled
    pub cluster_name: String,
    /// Desired worker count
    pub replicas: u32,
}

impl ScaleValues {
    /// Build from flags, falling back to a values file.
    ///
    /// Flags win over `managedCluster.name` and `managedCluster.replicas` from
    /// `values`. Without a values file both flags are required.
    pub fn resolve(
        name: Option<&str>,
        replicas: i64,
        values: Option<&ValueMapping>,
    ) -> Result<Self> {
        let name = name.filter(|n| !n.is_empty());
        let Some(values) = values else {
            let cluster_name = name.ok_or_else(|| Error::validation("values or name are missing"))?;
            if replicas == UNSET_REPLICAS {
                return Err(Error::validation("values or replicas are missing"));
            }
            return Self::new(cluster_name, replicas);
        };

        if values.get("managedCluster").is_none() {
            return Err(Error::validation_for_field("managedCluster", "managedCluster is missing"));
        }
        let cluster_name = match name {
            Some(n) => n.to_string(),
            None => values
                .get_str("managedCluster.name")
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    Error::validation_for_field("managedCluster.name", "cluster name is missing")
                })?
                .to_string(),
        };
        let replicas = if replicas != UNSET_REPLICAS {
            replicas
        } else {
            values.get_i64("managedCluster.replicas").ok_or_else(|| {
                Error::validation_for_field("managedCluster.replicas", "replicas number is missing")
            })?
        };
        Self::new(&cluster_name, replicas)
    }

    fn new(cluster_name: &str, replicas: i64) -> Result<Self> {
        let replicas = u32::try_from(replicas).map_err(|_| {
            Error::validation_for_field(
                "replicas",
                format!("replicas must be greater or equal to zero, got {replicas}"),
            )
        })?;
        Ok(Self {
            cluster_name: cluster_name.to_string(),
            replicas,
        })
    }

    /// The worker MachinePool of the cluster
    pub fn machine_pool(&self) -> ResourceRef {
        ResourceRef::namespaced(
            HIVE_API_VERSION,
            "MachinePool",
            &self.cluster_name,
            format!("{}-worker", self.cluster_name),
        )
    }
}

/// Set the worker replica count, touching nothing but `spec.replicas`
pub async fn scale(client: &dyn ResourceClient, values: &ScaleValues) -> Result<()> {
    let pool = values.machine_pool();
    if client.get(&pool).await?.is_none() {
        return Err(Error::validation_for_field(
            &values.cluster_name,
            format!("{pool} not found"),
        ));
    }
    client
        .merge_patch(&pool, &json!({"spec": {"replicas": values.replicas}}))
        .await?;
    info!(machine_pool = %pool, replicas = values.replicas, "scaled");
    Ok(())
}
