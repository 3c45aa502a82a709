//! Typed lookups along claim -> deployment -> admin kubeconfig
//!
//! A claim names the namespace its cluster was provisioned into; the
//! ClusterDeployment in that namespace (named after it) references the secret
//! holding the cluster's admin kubeconfig. Each hop is a separate lookup that
//! fails on its own.

use std::fmt;

use base64::Engine;
use cm_applier::ResourceClient;
use cm_common::kube_utils::ResourceRef;
use cm_common::{Error, Result};
use serde_json::Value;
use tracing::debug;

/// API version of Hive resources
pub const HIVE_API_VERSION: &str = "hive.openshift.io/v1";
/// Key of the kubeconfig in the admin kubeconfig secret
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Lifecycle phase of a claimed cluster, as reported by the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPhase {
    /// Waiting for a cluster to be assigned
    Pending,
    /// Assigned cluster is hibernating
    Hibernating,
    /// Assigned cluster is resuming
    Resuming,
    /// Assigned cluster is running
    Running,
    /// Claim or cluster failed
    Failed,
}

impl fmt::Display for ClaimPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Hibernating => "Hibernating",
            Self::Resuming => "Resuming",
            Self::Running => "Running",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

impl ClaimPhase {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(Self::Pending),
            "Hibernating" => Some(Self::Hibernating),
            "Resuming" => Some(Self::Resuming),
            "Running" => Some(Self::Running),
            "Failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

fn condition<'a>(obj: &'a Value, type_: &str) -> Option<&'a Value> {
    obj.pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(type_))
}

fn is_true(cond: &Value) -> bool {
    cond.get("status").and_then(Value::as_str) == Some("True")
}

/// Phase of a claim object.
///
/// An explicit `status.phase` wins; otherwise the phase is read from the
/// `Pending` and `ClusterRunning` conditions.
pub fn claim_phase(obj: &Value) -> Option<ClaimPhase> {
    if let Some(phase) = obj
        .pointer("/status/phase")
        .and_then(Value::as_str)
        .and_then(ClaimPhase::parse)
    {
        return Some(phase);
    }

    let failed = obj
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|conds| {
            conds.iter().any(|c| {
                c.get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t.ends_with("Failed"))
                    && is_true(c)
            })
        });
    if failed {
        return Some(ClaimPhase::Failed);
    }

    if condition(obj, "Pending").is_some_and(is_true) {
        return Some(ClaimPhase::Pending);
    }

    let running = condition(obj, "ClusterRunning")?;
    if is_true(running) {
        return Some(ClaimPhase::Running);
    }
    let reason = running.get("reason").and_then(Value::as_str).unwrap_or_default();
    if reason.contains("Hibernat") {
        Some(ClaimPhase::Hibernating)
    } else if reason.contains("Resum") {
        Some(ClaimPhase::Resuming)
    } else {
        Some(ClaimPhase::Pending)
    }
}

/// A cluster claim on the pool host
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterClaim {
    /// Claim name
    pub name: String,
    /// Namespace of the claim (the pool host namespace)
    pub namespace: String,
    /// Pool the claim draws from
    pub pool: String,
    /// Namespace the claimed cluster was provisioned into
    pub target_namespace: Option<String>,
    /// Current phase, if reported
    pub phase: Option<ClaimPhase>,
}

impl ClusterClaim {
    /// Address of a claim
    pub fn resource_ref(namespace: &str, name: &str) -> ResourceRef {
        ResourceRef::namespaced(HIVE_API_VERSION, "ClusterClaim", namespace, name)
    }

    /// Parse a claim object
    pub fn from_object(obj: &Value) -> Result<Self> {
        let r = ResourceRef::from_manifest(obj)?;
        let str_at = |p: &str| {
            obj.pointer(p)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Ok(Self {
            name: r.name,
            namespace: r.namespace.unwrap_or_default(),
            pool: str_at("/spec/clusterPoolName").unwrap_or_default(),
            target_namespace: str_at("/spec/namespace"),
            phase: claim_phase(obj),
        })
    }
}

/// The deployment record of a claimed cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDeployment {
    /// Deployment name
    pub name: String,
    /// Deployment namespace
    pub namespace: String,
    /// Name of the admin kubeconfig secret in the same namespace
    pub admin_kubeconfig_secret: String,
    /// Requested power state, if set
    pub power_state: Option<String>,
}

impl ClusterDeployment {
    /// Address of the deployment a claim is bound to
    pub fn resource_ref(namespace: &str) -> ResourceRef {
        ResourceRef::namespaced(HIVE_API_VERSION, "ClusterDeployment", namespace, namespace)
    }

    /// Parse a deployment object
    pub fn from_object(obj: &Value) -> Result<Self> {
        let r = ResourceRef::from_manifest(obj)?;
        let admin_kubeconfig_secret = obj
            .pointer("/spec/clusterMetadata/adminKubeconfigSecretRef/name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::internal_with_context(
                    "resolve_target",
                    format!("clusterdeployment {} has no admin kubeconfig secret", r.name),
                )
            })?
            .to_string();
        Ok(Self {
            namespace: r.namespace.unwrap_or_default(),
            name: r.name,
            admin_kubeconfig_secret,
            power_state: obj
                .pointer("/spec/powerState")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Fetch a claim from the pool host
pub async fn get_claim(
    client: &dyn ResourceClient,
    namespace: &str,
    name: &str,
) -> Result<ClusterClaim> {
    let r = ClusterClaim::resource_ref(namespace, name);
    let obj = client.get(&r).await?.ok_or_else(|| {
        Error::validation_for_field(
            name,
            format!("clusterclaim {name} not found in namespace {namespace}"),
        )
    })?;
    ClusterClaim::from_object(&obj)
}

/// Fetch the deployment a claim is bound to
pub async fn get_deployment(
    client: &dyn ResourceClient,
    claim: &ClusterClaim,
) -> Result<ClusterDeployment> {
    let ns = claim.target_namespace.as_deref().ok_or_else(|| {
        Error::internal_with_context(
            "resolve_target",
            format!("clusterclaim {} doesn't have a spec.namespace set", claim.name),
        )
    })?;
    let r = ClusterDeployment::resource_ref(ns);
    let obj = client.get(&r).await?.ok_or_else(|| {
        Error::internal_with_context("resolve_target", format!("{r} not found"))
    })?;
    ClusterDeployment::from_object(&obj)
}

/// Read the admin kubeconfig document of a deployment
pub async fn get_admin_kubeconfig(
    client: &dyn ResourceClient,
    deployment: &ClusterDeployment,
) -> Result<String> {
    let r = ResourceRef::namespaced(
        "v1",
        "Secret",
        &deployment.namespace,
        &deployment.admin_kubeconfig_secret,
    );
    let secret = client
        .get(&r)
        .await?
        .ok_or_else(|| Error::internal_with_context("resolve_target", format!("{r} not found")))?;
    let encoded = secret
        .pointer(&format!("/data/{KUBECONFIG_KEY}"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::internal_with_context(
                "resolve_target",
                format!("{r} has no {KUBECONFIG_KEY} key"),
            )
        })?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::serialization_for_kind("Secret", format!("{r}: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::serialization_for_kind("Secret", format!("{r}: {e}")))
}

/// Resolve the admin kubeconfig of the cluster bound to a claim
pub async fn resolve_target_kubeconfig(
    client: &dyn ResourceClient,
    namespace: &str,
    claim_name: &str,
) -> Result<String> {
    let claim = get_claim(client, namespace, claim_name).await?;
    let deployment = get_deployment(client, &claim).await?;
    debug!(
        claim = %claim.name,
        deployment = %deployment.name,
        secret = %deployment.admin_kubeconfig_secret,
        "resolved claimed cluster"
    );
    get_admin_kubeconfig(client, &deployment).await
}
