//! Join a cluster to a hub
//!
//! Joining installs the klusterlet bootstrap on the cluster: the agent
//! namespace, a bootstrap kubeconfig for the hub built from a hub token, and
//! the `Klusterlet` naming the cluster. The hub then sees a bootstrap CSR that
//! [`crate::accept`] approves.

use cm_applier::{Applier, ApplyReport, RenderedBundle, TemplateRenderer, ValueMapping};
use cm_common::{Error, Result};
use tracing::info;

use crate::scenario::JOIN_BUNDLE;

/// Namespace the klusterlet agent runs in
pub const AGENT_NAMESPACE: &str = "open-cluster-management-agent";
/// Secret holding the bootstrap kubeconfig
pub const BOOTSTRAP_SECRET: &str = "bootstrap-hub-kubeconfig";

/// Flag values of a join request; unset fields fall back to a values file
#[derive(Debug, Clone, Default)]
pub struct JoinFlags<'a> {
    /// `--name`
    pub cluster_name: Option<&'a str>,
    /// `--hub-token`
    pub hub_token: Option<&'a str>,
    /// `--hub-server-internal`
    pub hub_server_internal: Option<&'a str>,
    /// `--hub-server-external`
    pub hub_server_external: Option<&'a str>,
}

/// Validated input of a join request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinValues {
    /// Name the cluster registers under
    pub cluster_name: String,
    /// Hub bootstrap token
    pub hub_token: String,
    /// Hub API server reached by the agent
    pub hub_server_internal: String,
    /// Hub API server advertised to the hub
    pub hub_server_external: String,
    /// Base64 CA bundle of the hub, if known
    pub hub_ca_data: Option<String>,
}

impl JoinValues {
    /// Build from flags, falling back to `managedCluster.name` and `hub.*` in
    /// `values`. Flags win.
    pub fn resolve(flags: &JoinFlags<'_>, values: Option<&ValueMapping>) -> Result<Self> {
        let cluster_name = pick(flags.cluster_name, values, "managedCluster.name")
            .ok_or_else(|| Error::validation("values or name are missing"))?;
        let hub_token = pick(flags.hub_token, values, "hub.token")
            .ok_or_else(|| Error::validation_for_field("hub.token", "hub token is missing"))?;
        let hub_server_internal = pick(flags.hub_server_internal, values, "hub.serverInternal")
            .ok_or_else(|| {
                Error::validation_for_field("hub.serverInternal", "hub server is missing")
            })?;
        let hub_server_external = pick(flags.hub_server_external, values, "hub.serverExternal")
            .unwrap_or_else(|| hub_server_internal.clone());

        Ok(Self {
            cluster_name,
            hub_token,
            hub_server_internal,
            hub_server_external,
            hub_ca_data: pick(None, values, "hub.caData"),
        })
    }

    /// Template values of the join scenario
    pub fn to_values(&self) -> ValueMapping {
        ValueMapping::new()
            .with("managedCluster.name", self.cluster_name.as_str())
            .with("hub.token", self.hub_token.as_str())
            .with("hub.serverInternal", self.hub_server_internal.as_str())
            .with("hub.serverExternal", self.hub_server_external.as_str())
            .with("hub.caData", self.hub_ca_data.as_deref().unwrap_or_default())
    }
}

/// A non-blank flag, else a non-blank string at `path` in `values`
fn pick(flag: Option<&str>, values: Option<&ValueMapping>, path: &str) -> Option<String> {
    flag.or_else(|| values.and_then(|v| v.get_str(path)))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Render the klusterlet bootstrap manifests
pub fn render_join(renderer: &TemplateRenderer, values: &JoinValues) -> Result<RenderedBundle> {
    renderer.render(JOIN_BUNDLE, &values.to_values(), None)
}

/// Install the klusterlet bootstrap through `applier`
pub async fn join_hub(
    applier: &dyn Applier,
    renderer: &TemplateRenderer,
    values: &JoinValues,
) -> Result<ApplyReport> {
    let bundle = render_join(renderer, values)?;
    let report = applier.apply(&bundle).await?;
    info!(
        cluster = %values.cluster_name,
        hub = %values.hub_server_external,
        dry_run = applier.is_dry_run(),
        "join requested"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use base64::Engine;
    use cm_applier::testkit::FakeCluster;
    use cm_applier::{ApplyOutcome, DryRunApplier, KubeApplier};
    use cm_common::kube_utils::ResourceRef;
    use rstest::rstest;

    use crate::scenario::renderer;

    const HUB: &str = "https://api.hub.example.com:6443";

    fn flags() -> JoinFlags<'static> {
        JoinFlags {
            cluster_name: Some("foo"),
            hub_token: Some("abc.def"),
            hub_server_internal: Some(HUB),
            hub_server_external: None,
        }
    }

    fn joined() -> JoinValues {
        JoinValues::resolve(&flags(), None).unwrap()
    }

    fn bootstrap_kubeconfig(fake: &FakeCluster) -> String {
        let secret = fake
            .object(&ResourceRef::namespaced("v1", "Secret", AGENT_NAMESPACE, BOOTSTRAP_SECRET))
            .unwrap();
        let encoded = secret["data"]["kubeconfig"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        String::from_utf8(decoded).unwrap()
    }

    #[rstest]
    #[case(JoinFlags { cluster_name: None, ..flags() }, "values or name are missing")]
    #[case(JoinFlags { hub_token: Some(" "), ..flags() }, "hub token is missing")]
    #[case(JoinFlags { hub_server_internal: None, ..flags() }, "hub server is missing")]
    fn flags_only_validation(#[case] flags: JoinFlags<'static>, #[case] message: &str) {
        let err = JoinValues::resolve(&flags, None).unwrap_err();
        assert!(err.to_string().contains(message), "{err}");
    }

    #[test]
    fn values_file_fills_unset_flags() {
        let values = ValueMapping::from_yaml_str(
            "managedCluster:\n  name: bar\nhub:\n  token: t0k\n  \
             serverInternal: https://in:6443\n  serverExternal: https://out:6443\n  \
             caData: Q0E=\n",
        )
        .unwrap();

        let resolved = JoinValues::resolve(&JoinFlags::default(), Some(&values)).unwrap();
        assert_eq!(resolved.cluster_name, "bar");
        assert_eq!(resolved.hub_server_external, "https://out:6443");
        assert_eq!(resolved.hub_ca_data.as_deref(), Some("Q0E="));

        let overridden = JoinValues::resolve(&flags(), Some(&values)).unwrap();
        assert_eq!(overridden.cluster_name, "foo");
        assert_eq!(overridden.hub_token, "abc.def");
        assert_eq!(overridden.hub_server_external, "https://out:6443");
    }

    #[test]
    fn external_server_defaults_to_internal() {
        assert_eq!(joined().hub_server_external, HUB);
    }

    #[tokio::test]
    async fn join_installs_klusterlet_bootstrap() {
        let fake = FakeCluster::new();
        let applier = KubeApplier::new(Arc::new(fake.clone()));

        let report = join_hub(&applier, &renderer(), &joined()).await.unwrap();

        assert_eq!(report.count(ApplyOutcome::Created), 3);
        let kubeconfig = bootstrap_kubeconfig(&fake);
        assert!(kubeconfig.contains(&format!("server: {HUB}")));
        assert!(kubeconfig.contains("token: abc.def"));
        assert!(kubeconfig.contains("insecure-skip-tls-verify: true"));

        let klusterlet = fake
            .object(&ResourceRef::cluster_scoped(
                "operator.open-cluster-management.io/v1",
                "Klusterlet",
                "klusterlet",
            ))
            .unwrap();
        assert_eq!(klusterlet["spec"]["clusterName"], "foo");
        assert_eq!(klusterlet["spec"]["externalServerURLs"][0]["url"], HUB);
    }

    #[tokio::test]
    async fn ca_data_replaces_insecure_tls() {
        let fake = FakeCluster::new();
        let applier = KubeApplier::new(Arc::new(fake.clone()));
        let values = JoinValues {
            hub_ca_data: Some("Q0E=".to_string()),
            ..joined()
        };

        join_hub(&applier, &renderer(), &values).await.unwrap();

        let kubeconfig = bootstrap_kubeconfig(&fake);
        assert!(kubeconfig.contains("certificate-authority-data: Q0E="));
        assert!(!kubeconfig.contains("insecure-skip-tls-verify"));
    }

    #[tokio::test]
    async fn second_join_changes_nothing() {
        let fake = FakeCluster::new();
        let applier = KubeApplier::new(Arc::new(fake.clone()));
        join_hub(&applier, &renderer(), &joined()).await.unwrap();
        let writes = fake.writes();

        let report = join_hub(&applier, &renderer(), &joined()).await.unwrap();

        assert!(report.is_noop());
        assert_eq!(fake.writes(), writes);
    }

    #[tokio::test]
    async fn dry_run_renders_manifests() {
        let report = join_hub(&DryRunApplier::new(), &renderer(), &joined())
            .await
            .unwrap();

        let text = report.rendered.unwrap();
        assert!(text.contains("kind: Klusterlet"));
        assert!(text.contains("clusterName: foo"));
        assert!(text.contains(&format!("name: {BOOTSTRAP_SECRET}")));
    }
}
