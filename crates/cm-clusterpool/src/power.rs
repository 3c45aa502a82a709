//! Hibernate and resume claimed clusters
//!
//! Power state lives on the ClusterDeployment bound to a claim. Every claim in
//! a request is resolved before anything is written, so one bad name fails the
//! request without touching the others.

use std::fmt;

use cm_applier::{
    Applier, ApplyReport, RenderedBundle, ResourceClient, TemplateRenderer, ValueMapping,
};
use cm_common::{Error, Result};
use tracing::info;

use crate::claim::{get_claim, get_deployment};
use crate::host::ClusterPoolHost;
use crate::scenario::POWER_STATE;

/// Requested power state of a cluster deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Control plane and workers running
    Running,
    /// Suspended
    Hibernating,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "Running",
            Self::Hibernating => "Hibernating",
        })
    }
}

/// Split a comma separated list of claim names, dropping blanks
pub fn parse_claim_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render the power-state documents for `claims`, resolving each claim's
/// deployment through `pool` (reads only).
pub async fn render_power_state(
    pool: &dyn ResourceClient,
    renderer: &TemplateRenderer,
    host: &ClusterPoolHost,
    claims: &[String],
    state: PowerState,
) -> Result<RenderedBundle> {
    if claims.is_empty() {
        return Err(Error::validation("clusterclaim name is missing"));
    }

    let mut manifests = Vec::with_capacity(claims.len());
    for name in claims {
        let claim = get_claim(pool, &host.namespace, name).await?;
        let deployment = get_deployment(pool, &claim).await?;
        let values = ValueMapping::new()
            .with("clusterDeployment.name", deployment.name.as_str())
            .with("clusterDeployment.namespace", deployment.namespace.as_str())
            .with("clusterDeployment.powerState", state.to_string());
        let bundle = renderer.render(&[POWER_STATE], &values, None)?;
        manifests.extend(bundle.manifests().iter().cloned());
    }
    Ok(RenderedBundle::from_manifests(manifests))
}

/// Set the power state of every named claim's cluster through `applier`
pub async fn set_power_state(
    pool: &dyn ResourceClient,
    applier: &dyn Applier,
    renderer: &TemplateRenderer,
    host: &ClusterPoolHost,
    claims: &[String],
    state: PowerState,
) -> Result<ApplyReport> {
    let bundle = render_power_state(pool, renderer, host, claims, state).await?;
    let report = applier.apply(&bundle).await?;
    info!(
        host = %host.name,
        claims = claims.join(","),
        %state,
        dry_run = applier.is_dry_run(),
        "power state requested"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cm_applier::testkit::{FakeCluster, FakeOp};
    use cm_applier::{ApplyOutcome, DryRunApplier, KubeApplier};
    use serde_json::json;

    use crate::claim::{ClusterDeployment, HIVE_API_VERSION};
    use crate::scenario::renderer;

    fn host() -> ClusterPoolHost {
        ClusterPoolHost {
            name: "dev".to_string(),
            api_server: "https://api.dev:6443".to_string(),
            console: String::new(),
            namespace: "pools".to_string(),
            group: String::new(),
            context: None,
        }
    }

    fn seed_claim(fake: &FakeCluster, claim: &str, ns: &str) {
        fake.seed(json!({
            "apiVersion": HIVE_API_VERSION,
            "kind": "ClusterClaim",
            "metadata": {"name": claim, "namespace": "pools"},
            "spec": {"clusterPoolName": "aws", "namespace": ns}
        }));
        fake.seed(json!({
            "apiVersion": HIVE_API_VERSION,
            "kind": "ClusterDeployment",
            "metadata": {"name": ns, "namespace": ns},
            "spec": {
                "powerState": "Running",
                "baseDomain": "example.com",
                "clusterMetadata": {"adminKubeconfigSecretRef": {"name": format!("{ns}-admin")}}
            }
        }));
    }

    #[test]
    fn claim_lists_are_trimmed() {
        assert_eq!(parse_claim_list(" a, b,,c "), ["a", "b", "c"]);
        assert!(parse_claim_list("").is_empty());
    }

    #[tokio::test]
    async fn hibernate_touches_only_power_state() {
        let fake = FakeCluster::new();
        seed_claim(&fake, "one", "ns-one");
        seed_claim(&fake, "two", "ns-two");
        let applier = KubeApplier::new(Arc::new(fake.clone()));

        let claims = parse_claim_list("one,two");
        let report = set_power_state(
            &fake,
            &applier,
            &renderer(),
            &host(),
            &claims,
            PowerState::Hibernating,
        )
        .await
        .unwrap();

        assert_eq!(report.count(ApplyOutcome::Updated), 2);
        let cd = fake.object(&ClusterDeployment::resource_ref("ns-one")).unwrap();
        assert_eq!(cd["spec"]["powerState"], "Hibernating");
        assert_eq!(cd["spec"]["baseDomain"], "example.com");
    }

    #[tokio::test]
    async fn unknown_claim_fails_before_any_write() {
        let fake = FakeCluster::new();
        seed_claim(&fake, "one", "ns-one");
        let applier = KubeApplier::new(Arc::new(fake.clone()));

        let claims = parse_claim_list("one,ghost");
        let state = PowerState::Hibernating;
        let result = set_power_state(&fake, &applier, &renderer(), &host(), &claims, state).await;

        assert!(result.is_err());
        assert_eq!(fake.writes(), 0);
    }

    #[tokio::test]
    async fn dry_run_renders_without_writing() {
        let fake = FakeCluster::new();
        seed_claim(&fake, "one", "ns-one");

        let report = set_power_state(
            &fake,
            &DryRunApplier::new(),
            &renderer(),
            &host(),
            &["one".to_string()],
            PowerState::Running,
        )
        .await
        .unwrap();

        let text = report.rendered.unwrap();
        assert!(text.contains("powerState: Running"));
        assert!(text.contains("namespace: ns-one"));
        assert_eq!(fake.writes(), 0);
        assert_eq!(fake.calls(FakeOp::Get), 2);
    }
}
