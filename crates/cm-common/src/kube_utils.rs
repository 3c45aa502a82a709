//! Shared Kubernetes utilities using kube-rs
//!
//! Resource addressing for untyped manifests and client construction from
//! kubeconfig documents. Both the pool-hosting cluster and claimed target
//! clusters are reached through these helpers.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

/// Address of a single resource on an API server.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceRef {
    /// Full API version (e.g., "hive.openshift.io/v1", "v1")
    pub api_version: String,
    /// Resource kind (e.g., "ClusterClaim")
    pub kind: String,
    /// Namespace; `None` for cluster-scoped resources
    pub namespace: Option<String>,
    /// Resource name
    pub name: String,
}

impl ResourceRef {
    /// Reference a namespaced resource
    pub fn namespaced(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Reference a cluster-scoped resource
    pub fn cluster_scoped(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: None,
            name: name.into(),
        }
    }

    /// Extract the reference from a manifest's apiVersion, kind and metadata.
    pub fn from_manifest(manifest: &Value) -> Result<Self> {
        let field = |pointer: &str| {
            manifest
                .pointer(pointer)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let api_version = field("/apiVersion")
            .ok_or_else(|| Error::serialization("manifest missing apiVersion"))?;
        let kind = field("/kind").ok_or_else(|| Error::serialization("manifest missing kind"))?;
        let name = field("/metadata/name")
            .ok_or_else(|| Error::serialization_for_kind(&kind, "manifest missing metadata.name"))?;
        let namespace = field("/metadata/namespace");

        Ok(Self {
            api_version,
            kind,
            namespace,
            name,
        })
    }

    /// The `ApiResource` used to address this reference with a dynamic API
    pub fn api_resource(&self) -> ApiResource {
        build_api_resource(&self.api_version, &self.kind)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Build an ApiResource from an explicit apiVersion and kind.
///
/// ```ignore
/// let ar = build_api_resource("hive.openshift.io/v1", "ClusterClaim");
/// let api: Api<DynamicObject> = Api::namespaced_with(client, "pool", &ar);
/// ```
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use cm_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("hive.openshift.io/v1");
/// assert_eq!(group, "hive.openshift.io");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Known kind -> plural mappings for the resources cm touches
const KIND_PLURALS: &[(&str, &str)] = &[
    // Core
    ("secret", "secrets"),
    ("serviceaccount", "serviceaccounts"),
    ("namespace", "namespaces"),
    ("configmap", "configmaps"),
    // RBAC
    ("role", "roles"),
    ("rolebinding", "rolebindings"),
    ("clusterrole", "clusterroles"),
    ("clusterrolebinding", "clusterrolebindings"),
    // Certificates
    ("certificatesigningrequest", "certificatesigningrequests"),
    // Hive
    ("clusterpool", "clusterpools"),
    ("clusterclaim", "clusterclaims"),
    ("clusterdeployment", "clusterdeployments"),
    ("machinepool", "machinepools"),
    ("clusterimageset", "clusterimagesets"),
    // Open Cluster Management
    ("managedcluster", "managedclusters"),
    ("managedclusterset", "managedclustersets"),
    ("klusterletaddonconfig", "klusterletaddonconfigs"),
];

/// Kinds that are not namespaced
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "namespace",
    "node",
    "clusterrole",
    "clusterrolebinding",
    "certificatesigningrequest",
    "customresourcedefinition",
    "clusterimageset",
    "managedcluster",
    "managedclusterset",
    "klusterlet",
    "persistentvolume",
    "storageclass",
    "selfsubjectreview",
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for known types, falling back to simple
/// pluralization rules for unknown types.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(s, _)| *s == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Whether a kind is cluster-scoped (namespace overrides do not apply)
pub fn is_cluster_scoped(kind: &str) -> bool {
    let lower = kind.to_lowercase();
    CLUSTER_SCOPED_KINDS.contains(&lower.as_str())
}

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a client for the pool-hosting cluster.
///
/// Reads the kubeconfig at `kubeconfig` when given, otherwise the standard
/// `KUBECONFIG`/`~/.kube/config` resolution. `context` selects a named
/// context instead of the file's current one.
pub async fn create_client(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Client> {
    let kc = match kubeconfig {
        Some(path) => Kubeconfig::read_from(path),
        None => Kubeconfig::read(),
    }
    .map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to read kubeconfig: {e}"))
    })?;
    client_from_kubeconfig(kc, context).await
}

/// Create a client from an in-memory kubeconfig document.
///
/// Used for claimed clusters whose admin kubeconfig is read out of a secret.
pub async fn client_from_kubeconfig_yaml(yaml: &str) -> Result<Client> {
    let kc = Kubeconfig::from_yaml(yaml).map_err(|e| {
        Error::internal_with_context(
            "client_from_kubeconfig_yaml",
            format!("failed to parse kubeconfig: {e}"),
        )
    })?;
    client_from_kubeconfig(kc, None).await
}

async fn client_from_kubeconfig(kc: Kubeconfig, context: Option<&str>) -> Result<Client> {
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };
    let mut config = Config::from_custom_kubeconfig(kc, &options)
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to load kubeconfig: {e}"),
            )
        })?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    debug!(server = %config.cluster_url, "creating kube client");
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {e}"))
    })
}
