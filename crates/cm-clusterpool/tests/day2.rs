//! Scale, accept and power flows against the in-memory cluster

use cm_applier::testkit::FakeCluster;
use cm_applier::ValueMapping;
use cm_clusterpool::accept::{accept_clusters, resolve_clusters, BOOTSTRAP_GROUP, CLUSTER_LABEL};
use cm_clusterpool::scale::{scale, ScaleValues, UNSET_REPLICAS};
use cm_common::Error;
use serde_json::json;

fn machine_pool(fake: &FakeCluster, cluster: &str) -> cm_common::kube_utils::ResourceRef {
    fake.seed(json!({
        "apiVersion": "hive.openshift.io/v1",
        "kind": "MachinePool",
        "metadata": {"name": format!("{cluster}-worker"), "namespace": cluster},
        "spec": {
            "name": "worker",
            "replicas": 1,
            "platform": {"aws": {"type": "m5.xlarge"}},
            "clusterDeploymentRef": {"name": cluster}
        }
    }))
}

#[tokio::test]
async fn scale_from_values_touches_only_replicas() {
    let fake = FakeCluster::new();
    let pool = machine_pool(&fake, "foo");
    let before = fake.object(&pool).unwrap();
    let values =
        ValueMapping::from_yaml_str("managedCluster:\n  name: foo\n  replicas: 3\n").unwrap();

    let resolved = ScaleValues::resolve(None, UNSET_REPLICAS, Some(&values)).unwrap();
    scale(&fake, &resolved).await.unwrap();

    let after = fake.object(&pool).unwrap();
    assert_eq!(after["metadata"]["name"], "foo-worker");
    assert_eq!(after["metadata"]["namespace"], "foo");
    assert_eq!(after["spec"]["replicas"], 3);
    let mut expected = before["spec"].clone();
    expected["replicas"] = json!(3);
    assert_eq!(after["spec"], expected);
}

#[tokio::test]
async fn scale_without_name_fails_before_any_call() {
    let fake = FakeCluster::new();

    let result = async {
        let values = ScaleValues::resolve(None, UNSET_REPLICAS, None)?;
        scale(&fake, &values).await
    }
    .await;

    assert!(matches!(result, Err(Error::Validation { .. })));
    assert_eq!(fake.total_calls(), 0);
}

#[tokio::test]
async fn accept_every_listed_cluster() {
    let fake = FakeCluster::new();
    for cluster in ["a", "b"] {
        fake.seed(json!({
            "apiVersion": "certificates.k8s.io/v1",
            "kind": "CertificateSigningRequest",
            "metadata": {"name": format!("{cluster}-csr"), "labels": {CLUSTER_LABEL: cluster}},
            "spec": {"username": format!("system:bootstrap:{cluster}"), "groups": [BOOTSTRAP_GROUP]}
        }));
        fake.seed(json!({
            "apiVersion": "cluster.open-cluster-management.io/v1",
            "kind": "ManagedCluster",
            "metadata": {"name": cluster},
            "spec": {"hubAcceptsClient": false}
        }));
    }
    let values = ValueMapping::from_yaml_str("clusters: [b]\n").unwrap();

    let clusters = resolve_clusters(Some("a"), Some(&values)).unwrap();
    let reports = accept_clusters(&fake, &clusters).await.unwrap();

    let approved: Vec<_> = reports.iter().filter_map(|r| r.approved_csr.as_deref()).collect();
    assert_eq!(approved, ["a-csr", "b-csr"]);
    assert!(reports.iter().all(|r| r.hub_accepts_client_set));
}
