//! Accept joining clusters on a hub
//!
//! For each cluster: approve its pending bootstrap CSR, then make sure the hub
//! accepts the cluster's client.

use std::fmt;

use cm_applier::{ListQuery, ResourceClient, ValueMapping};
use cm_common::kube_utils::ResourceRef;
use cm_common::{Error, Result};
use serde_json::{json, Value};
use tracing::info;

/// Label carrying the cluster name on bootstrap CSRs
pub const CLUSTER_LABEL: &str = "open-cluster-management.io/cluster-name";
/// Username prefix of bootstrap CSRs
pub const BOOTSTRAP_USER_PREFIX: &str = "system:bootstrap:";
/// Group bootstrap CSRs are issued under
pub const BOOTSTRAP_GROUP: &str = "system:bootstrappers:managedcluster";

const CSR_API_VERSION: &str = "certificates.k8s.io/v1";
/// API version of `ManagedCluster`
pub const MANAGED_CLUSTER_API_VERSION: &str = "cluster.open-cluster-management.io/v1";

/// What accepting one cluster did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptReport {
    /// Cluster name
    pub cluster: String,
    /// Name of the approved CSR, if one was pending
    pub approved_csr: Option<String>,
    /// Whether `hubAcceptsClient` had to be set
    pub hub_accepts_client_set: bool,
}

impl fmt::Display for AcceptReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.approved_csr {
            Some(csr) => write!(f, "{}: CSR {csr} approved", self.cluster)?,
            None => write!(f, "{}: no CSR to approve", self.cluster)?,
        }
        if self.hub_accepts_client_set {
            f.write_str(", hubAcceptsClient set")
        } else {
            f.write_str(", hubAcceptsClient already set")
        }
    }
}

/// Cluster names from a comma separated flag merged with `clusters` from a
/// values file, flag names first, without duplicates.
pub fn resolve_clusters(flag: Option<&str>, values: Option<&ValueMapping>) -> Result<Vec<String>> {
    let mut clusters: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim();
        if !name.is_empty() && !clusters.iter().any(|c| c == name) {
            clusters.push(name.to_string());
        }
    };

    if let Some(flag) = flag {
        flag.split(',').for_each(&mut push);
    }
    if let Some(values) = values {
        let listed = values
            .get("clusters")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::validation_for_field("clusters", "clusters is missing"))?;
        for name in listed {
            let name = name.as_str().ok_or_else(|| {
                Error::validation_for_field("clusters", "cluster names must be strings")
            })?;
            push(name);
        }
    }

    if clusters.is_empty() {
        return Err(Error::validation("values or name are missing"));
    }
    Ok(clusters)
}

fn is_pending_bootstrap_csr(csr: &Value) -> bool {
    let from_bootstrap_user = csr
        .pointer("/spec/username")
        .and_then(Value::as_str)
        .is_some_and(|u| u.starts_with(BOOTSTRAP_USER_PREFIX));
    let in_bootstrap_group = csr
        .pointer("/spec/groups")
        .and_then(Value::as_array)
        .is_some_and(|gs| gs.iter().any(|g| g.as_str() == Some(BOOTSTRAP_GROUP)));
    let decided = csr
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|cs| {
            cs.iter().any(|c| {
                matches!(
                    c.get("type").and_then(Value::as_str),
                    Some("Approved" | "Denied")
                )
            })
        });
    from_bootstrap_user && in_bootstrap_group && !decided
}

async fn approve_csr(client: &dyn ResourceClient, cluster: &str) -> Result<Option<String>> {
    let query = ListQuery::new(CSR_API_VERSION, "CertificateSigningRequest")
        .labels(format!("{CLUSTER_LABEL}={cluster}"));
    let csrs = client.list(&query).await?;
    let Some(mut csr) = csrs.into_iter().find(is_pending_bootstrap_csr) else {
        return Ok(None);
    };

    let r = ResourceRef::from_manifest(&csr)?;
    let condition = json!({
        "type": "Approved",
        "status": "True",
        "reason": "CmApprove",
        "message": "This CSR was approved by cm accept clusters.",
    });
    let status = csr
        .as_object_mut()
        .map(|o| o.entry("status").or_insert_with(|| json!({})));
    match status {
        Some(Value::Object(status)) => {
            let conditions = status.entry("conditions").or_insert_with(|| json!([]));
            match conditions.as_array_mut() {
                Some(list) => list.push(condition),
                None => *conditions = json!([condition]),
            }
        }
        _ => {
            return Err(Error::serialization_for_kind(
                "CertificateSigningRequest",
                "status is not an object",
            ))
        }
    }

    client.replace_subresource(&r, "approval", &csr).await?;
    info!(cluster, csr = %r.name, "CSR approved");
    Ok(Some(r.name))
}

/// The hub's `ManagedCluster` of a cluster
pub fn managed_cluster_ref(cluster: &str) -> ResourceRef {
    ResourceRef::cluster_scoped(MANAGED_CLUSTER_API_VERSION, "ManagedCluster", cluster)
}

async fn accept_client(client: &dyn ResourceClient, cluster: &str) -> Result<bool> {
    let r = managed_cluster_ref(cluster);
    let managed = client
        .get(&r)
        .await?
        .ok_or_else(|| Error::validation_for_field(cluster, format!("{r} not found")))?;
    if managed.pointer("/spec/hubAcceptsClient").and_then(Value::as_bool) == Some(true) {
        return Ok(false);
    }
    client
        .merge_patch(&r, &json!({"spec": {"hubAcceptsClient": true}}))
        .await?;
    info!(cluster, "hubAcceptsClient set");
    Ok(true)
}

/// Accept every cluster in order, stopping at the first failure
pub async fn accept_clusters(
    client: &dyn ResourceClient,
    clusters: &[String],
) -> Result<Vec<AcceptReport>> {
    let mut reports = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        let approved_csr = approve_csr(client, cluster).await?;
        let hub_accepts_client_set = accept_client(client, cluster).await?;
        reports.push(AcceptReport {
            cluster: cluster.clone(),
            approved_csr,
            hub_accepts_client_set,
        });
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_applier::testkit::{FakeCluster, FakeOp};

    fn csr(name: &str, cluster: &str, user: &str, conditions: Value) -> Value {
        json!({
            "apiVersion": CSR_API_VERSION,
            "kind": "CertificateSigningRequest",
            "metadata": {"name": name, "labels": {CLUSTER_LABEL: cluster}},
            "spec": {"username": user, "groups": [BOOTSTRAP_GROUP, "system:authenticated"]},
            "status": {"conditions": conditions}
        })
    }

    fn managed_cluster(name: &str, accepted: bool) -> Value {
        json!({
            "apiVersion": MANAGED_CLUSTER_API_VERSION,
            "kind": "ManagedCluster",
            "metadata": {"name": name},
            "spec": {"hubAcceptsClient": accepted, "leaseDurationSeconds": 60}
        })
    }

    #[test]
    fn cluster_names_merge_flag_and_values() {
        let values = ValueMapping::from_yaml_str("clusters: [b, c]\n").unwrap();
        let merged = resolve_clusters(Some("a, b"), Some(&values)).unwrap();
        assert_eq!(merged, ["a", "b", "c"]);

        assert!(resolve_clusters(None, None).is_err());
        assert!(resolve_clusters(Some(" , "), None).is_err());
    }

    #[tokio::test]
    async fn approves_only_pending_bootstrap_csr() {
        let fake = FakeCluster::new();
        let decided = json!([{"type": "Approved", "status": "True"}]);
        fake.seed(csr("old", "foo", "system:bootstrap:abc", decided));
        fake.seed(csr("stranger", "foo", "kube:admin", json!([])));
        let pending = fake.seed(csr("pending", "foo", "system:bootstrap:abc", json!([])));
        fake.seed(managed_cluster("foo", false));

        let reports = accept_clusters(&fake, &["foo".to_string()]).await.unwrap();

        assert_eq!(reports[0].approved_csr.as_deref(), Some("pending"));
        assert!(reports[0].hub_accepts_client_set);
        let approved = fake.object(&pending).unwrap();
        assert_eq!(approved["status"]["conditions"][0]["type"], "Approved");
        let mc = fake.object(&managed_cluster_ref("foo")).unwrap();
        assert_eq!(mc["spec"]["hubAcceptsClient"], true);
        assert_eq!(mc["spec"]["leaseDurationSeconds"], 60);
    }

    #[tokio::test]
    async fn csr_with_scalar_status_is_not_approved() {
        let fake = FakeCluster::new();
        let mut broken = csr("broken", "foo", "system:bootstrap:abc", json!([]));
        broken["status"] = json!("Pending");
        fake.seed(broken);
        fake.seed(managed_cluster("foo", false));

        let err = accept_clusters(&fake, &["foo".to_string()]).await.unwrap_err();

        assert!(err.to_string().contains("status is not an object"), "{err}");
        assert_eq!(fake.writes(), 0);
    }

    #[tokio::test]
    async fn already_accepted_cluster_is_left_alone() {
        let fake = FakeCluster::new();
        fake.seed(managed_cluster("foo", true));

        let reports = accept_clusters(&fake, &["foo".to_string()]).await.unwrap();

        assert_eq!(reports[0].approved_csr, None);
        assert!(!reports[0].hub_accepts_client_set);
        assert_eq!(fake.writes(), 0);
        assert_eq!(reports[0].to_string(), "foo: no CSR to approve, hubAcceptsClient already set");
    }

    #[tokio::test]
    async fn missing_managed_cluster_fails() {
        let fake = FakeCluster::new();
        let err = accept_clusters(&fake, &["ghost".to_string()]).await.unwrap_err();

        assert!(err.to_string().contains("ghost"));
        assert_eq!(fake.calls(FakeOp::Patch), 0);
    }
}
