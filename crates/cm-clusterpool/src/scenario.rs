//! Embedded scenario templates

use cm_applier::{AssetStore, TemplateRenderer};

/// Scenario creating the token-bearing service account on a claimed cluster
pub const CREATE_CLUSTER: &str = "create/cluster";
/// Scenario setting a cluster deployment's power state
pub const HIBERNATE: &str = "hibernate/clusterdeployment";
/// Scenario scaling a cluster's worker pool
pub const SCALE: &str = "scale/cluster";
/// Scenario accepting clusters on a hub
pub const ACCEPT: &str = "accept/clusters";
/// Scenario joining a cluster to a hub
pub const JOIN: &str = "join/hub";
/// Scenario removing a managed cluster from a hub
pub const DETACH: &str = "detach/cluster";

/// Templates of the credential bundle, in apply order
pub const TOKEN_BUNDLE: &[&str] = &[
    "create/cluster/sa.yaml",
    "create/cluster/secret-token.yaml",
    "create/cluster/role-binding.yaml",
];

/// Klusterlet bootstrap manifests, in apply order
pub const JOIN_BUNDLE: &[&str] = &[
    "join/hub/namespace.yaml",
    "join/hub/bootstrap-hub-kubeconfig.yaml",
    "join/hub/klusterlet.yaml",
];

/// Template patching `spec.powerState`
pub const POWER_STATE: &str = "hibernate/clusterdeployment/power-state.yaml";

macro_rules! asset {
    ($path:literal) => {
        ($path, include_str!(concat!("../scenarios/", $path)))
    };
}

static ASSETS: &[(&str, &str)] = &[
    asset!("create/cluster/sa.yaml"),
    asset!("create/cluster/secret-token.yaml"),
    asset!("create/cluster/role-binding.yaml"),
    asset!("create/cluster/values-template.yaml"),
    asset!("hibernate/clusterdeployment/power-state.yaml"),
    asset!("hibernate/clusterdeployment/values-template.yaml"),
    asset!("scale/cluster/values-template.yaml"),
    asset!("accept/clusters/values-template.yaml"),
    asset!("join/hub/namespace.yaml"),
    asset!("join/hub/bootstrap-hub-kubeconfig.yaml"),
    asset!("join/hub/klusterlet.yaml"),
    asset!("join/hub/values-template.yaml"),
    asset!("detach/cluster/values-template.yaml"),
];

/// All embedded scenario assets
pub fn assets() -> AssetStore {
    AssetStore::new(ASSETS)
}

/// Renderer over the embedded scenarios
pub fn renderer() -> TemplateRenderer {
    TemplateRenderer::new(assets())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_applier::ValueMapping;

    #[test]
    fn token_bundle_renders_in_dependency_order() {
        let values = ValueMapping::new().with("serviceAccountName", "alice");
        let bundle = renderer().render(TOKEN_BUNDLE, &values, None).unwrap();

        let kinds: Vec<_> = bundle
            .manifests()
            .iter()
            .map(|m| m.resource.kind.as_str())
            .collect();
        assert_eq!(kinds, ["ServiceAccount", "Secret", "RoleBinding"]);
        assert!(bundle
            .manifests()
            .iter()
            .all(|m| m.resource.namespace.as_deref() == Some("default")));
    }

    #[test]
    fn every_scenario_ships_a_values_template() {
        let store = assets();
        for scenario in [CREATE_CLUSTER, HIBERNATE, SCALE, ACCEPT, JOIN, DETACH] {
            let path = format!("{scenario}/values-template.yaml");
            let text = store.get(&path).unwrap();
            assert!(ValueMapping::from_yaml_str(text).is_ok(), "{path}");
        }
    }

    #[test]
    fn join_bundle_covers_every_join_manifest() {
        let mut manifests = assets().paths_under(JOIN);
        manifests.retain(|p| !p.ends_with("values-template.yaml"));
        assert_eq!(manifests, JOIN_BUNDLE);
    }

    #[test]
    fn export_writes_scenario_files() {
        let dir = tempfile::tempdir().unwrap();
        let written = assets().extract_to(SCALE, dir.path()).unwrap();

        assert_eq!(written.len(), 1);
        assert!(dir.path().join("scale/cluster/values-template.yaml").exists());
    }
}
