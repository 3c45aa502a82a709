//! Render -> apply behavior against the in-memory cluster

use std::sync::Arc;

use cm_applier::testkit::{FakeCluster, FakeOp};
use cm_applier::{
    ApiError, Applier, ApplyOutcome, AssetStore, DryRunApplier, KubeApplier, TemplateRenderer,
    ValueMapping,
};
use cm_common::retry::RetryConfig;
use cm_common::Error;

const ASSETS: &[(&str, &str)] = &[
    (
        "create/cluster/sa.yaml",
        r#"apiVersion: v1
kind: ServiceAccount
metadata:
  name: {{ serviceAccountName }}
  namespace: default
"#,
    ),
    (
        "create/cluster/secret-token.yaml",
        r#"apiVersion: v1
kind: Secret
metadata:
  name: {{ serviceAccountName }}-token
  namespace: default
  annotations:
    kubernetes.io/service-account.name: {{ serviceAccountName }}
type: kubernetes.io/service-account-token
"#,
    ),
    (
        "create/cluster/role-binding.yaml",
        r#"apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: {{ serviceAccountName }}
  namespace: default
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: cluster-admin
subjects:
- kind: ServiceAccount
  name: {{ serviceAccountName }}
  namespace: default
"#,
    ),
];

fn renderer() -> TemplateRenderer {
    TemplateRenderer::new(AssetStore::new(ASSETS))
}

fn values() -> ValueMapping {
    ValueMapping::new().with("serviceAccountName", "alice")
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(2),
        backoff_multiplier: 2.0,
    }
}

#[tokio::test]
async fn reapplying_same_bundle_changes_nothing() {
    let fake = FakeCluster::new();
    let applier = KubeApplier::new(Arc::new(fake.clone()));
    let bundle = renderer().render_scenario("create/cluster", &values(), None).unwrap();

    let first = applier.apply(&bundle).await.unwrap();
    let creates = fake.calls(FakeOp::Create);
    let second = applier.apply(&bundle).await.unwrap();

    assert_eq!(first.count(ApplyOutcome::Created), 3);
    assert_eq!(second.count(ApplyOutcome::Unchanged), 3);
    assert!(second.is_noop());
    assert_eq!(fake.calls(FakeOp::Create), creates);
    assert_eq!(fake.calls(FakeOp::Replace), 0);
}

#[tokio::test]
async fn changed_manifest_is_updated_in_place() {
    let fake = FakeCluster::new();
    let applier = KubeApplier::new(Arc::new(fake.clone()));
    let bundle = renderer().render_scenario("create/cluster", &values(), None).unwrap();
    applier.apply(&bundle).await.unwrap();

    let mut manifests = bundle.manifests().to_vec();
    manifests[0].object["metadata"]["labels"] = serde_json::json!({"team": "a"});
    let changed = cm_applier::RenderedBundle::from_manifests(manifests);
    let report = applier.apply(&changed).await.unwrap();

    assert_eq!(report.records[0].outcome, ApplyOutcome::Updated);
    assert_eq!(report.count(ApplyOutcome::Unchanged), 2);
    let sa = fake.object(&changed.manifests()[0].resource).unwrap();
    assert_eq!(sa["metadata"]["labels"]["team"], "a");
}

#[tokio::test]
async fn missing_value_never_reaches_the_cluster() {
    let fake = FakeCluster::new();
    let applier = KubeApplier::new(Arc::new(fake.clone()));

    let result = async {
        let bundle = renderer().render_scenario("create/cluster", &ValueMapping::new(), None)?;
        applier.apply(&bundle).await
    }
    .await;

    assert!(matches!(result, Err(Error::Render { .. })));
    assert_eq!(fake.total_calls(), 0);
}

#[tokio::test]
async fn forbidden_on_second_manifest_keeps_first() {
    let fake = FakeCluster::new();
    let bundle = renderer().render_scenario("create/cluster", &values(), None).unwrap();
    let applier = KubeApplier::new(Arc::new(fake.clone())).with_retry(fast_retry());

    let first_only = cm_applier::RenderedBundle::from_manifests(bundle.manifests()[..1].to_vec());
    applier.apply(&first_only).await.unwrap();
    fake.fail_next(
        FakeOp::Create,
        ApiError::forbidden(&bundle.manifests()[1].resource, "denied"),
    );

    assert!(applier.apply(&bundle).await.is_err());
    assert!(fake.object(&bundle.manifests()[0].resource).is_some());
    assert!(fake.object(&bundle.manifests()[1].resource).is_none());
    assert!(fake.object(&bundle.manifests()[2].resource).is_none());
}

#[tokio::test]
async fn dry_run_is_offline_and_deterministic() {
    let fake = FakeCluster::new();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("rendered.yaml");
    let applier = DryRunApplier::with_output_file(&out);

    let a = applier
        .apply(&renderer().render_scenario("create/cluster", &values(), None).unwrap())
        .await
        .unwrap();
    let first_file = std::fs::read(&out).unwrap();
    let b = applier
        .apply(&renderer().render_scenario("create/cluster", &values(), None).unwrap())
        .await
        .unwrap();

    assert_eq!(a.rendered, b.rendered);
    assert_eq!(first_file, std::fs::read(&out).unwrap());
    assert_eq!(a.count(ApplyOutcome::Rendered), 3);
    assert_eq!(fake.total_calls(), 0);
}
