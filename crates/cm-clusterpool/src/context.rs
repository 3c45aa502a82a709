//! Persisted multi-context credential store
//!
//! The store is a kubectl kubeconfig. It is loaded, merged and written back
//! once per invocation through an explicit [`ContextStore`] handle; writes go
//! through a temp file and rename so readers never see a partial file. Fields
//! this crate does not model are carried through untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cm_common::fs::write_atomic;
use cm_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use tracing::info;

type Extra = BTreeMap<String, YamlValue>;

/// Kubeconfig document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// API version
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Kind (always "Config")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Clusters
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    /// Users
    #[serde(default)]
    pub users: Vec<NamedUser>,
    /// Contexts
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    /// Current context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,
    #[serde(flatten)]
    extra: Extra,
}

/// Cluster entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    /// Cluster name
    pub name: String,
    /// Cluster config
    pub cluster: ClusterConfig,
}

/// Cluster configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// API server URL
    pub server: String,
    /// CA certificate (base64 encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
    /// Skip server certificate verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_tls_verify: Option<bool>,
    #[serde(flatten)]
    extra: Extra,
}

/// User entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    /// User name
    pub name: String,
    /// User config
    pub user: UserConfig,
}

/// User configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(flatten)]
    extra: Extra,
}

/// Context entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    /// Context name
    pub name: String,
    /// Context config
    pub context: ContextConfig,
}

/// Context configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Cluster name (reference)
    pub cluster: String,
    /// User name (reference)
    pub user: String,
    /// Default namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    extra: Extra,
}

impl Kubeconfig {
    /// Parse a kubeconfig document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))
    }

    /// The context named `name`
    pub fn context(&self, name: &str) -> Option<&NamedContext> {
        self.contexts.iter().find(|c| c.name == name)
    }

    /// The cluster named `name`
    pub fn cluster(&self, name: &str) -> Option<&NamedCluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    /// The user named `name`
    pub fn user(&self, name: &str) -> Option<&NamedUser> {
        self.users.iter().find(|u| u.name == name)
    }

    /// Cluster reached by the current context, or by the only cluster
    pub fn current_cluster(&self) -> Option<&ClusterConfig> {
        let by_context = self
            .current_context
            .as_deref()
            .and_then(|name| self.context(name))
            .and_then(|ctx| self.cluster(&ctx.context.cluster));
        match (by_context, self.clusters.as_slice()) {
            (Some(c), _) => Some(&c.cluster),
            (None, [only]) => Some(&only.cluster),
            _ => None,
        }
    }

    /// Insert or replace the cluster, user and context of `entry`.
    ///
    /// The current-context pointer only moves when `set_current` is true.
    pub fn upsert(&mut self, entry: &ContextEntry, set_current: bool) {
        let cluster = ClusterConfig {
            server: entry.server.clone(),
            certificate_authority_data: entry.certificate_authority_data.clone(),
            insecure_skip_tls_verify: entry.insecure_skip_tls_verify.then_some(true),
            ..Default::default()
        };
        upsert_named(&mut self.clusters, &entry.name, |c| &c.name, || NamedCluster {
            name: entry.name.clone(),
            cluster,
        });

        upsert_named(&mut self.users, &entry.user, |u| &u.name, || NamedUser {
            name: entry.user.clone(),
            user: UserConfig {
                token: Some(entry.token.clone()),
                ..Default::default()
            },
        });

        upsert_named(&mut self.contexts, &entry.name, |c| &c.name, || NamedContext {
            name: entry.name.clone(),
            context: ContextConfig {
                cluster: entry.name.clone(),
                user: entry.user.clone(),
                namespace: Some(entry.namespace.clone()),
                ..Default::default()
            },
        });

        if set_current {
            self.current_context = Some(entry.name.clone());
        }
        if self.api_version.is_none() {
            self.api_version = Some("v1".to_string());
        }
        if self.kind.is_none() {
            self.kind = Some("Config".to_string());
        }
    }
}

/// Replace every item named `name` with one fresh item, keeping the position
/// of the first.
fn upsert_named<T>(
    items: &mut Vec<T>,
    name: &str,
    name_of: impl Fn(&T) -> &String,
    make: impl FnOnce() -> T,
) {
    match items.iter().position(|i| name_of(i) == name) {
        Some(pos) => {
            items[pos] = make();
            let mut index = 0;
            items.retain(|i| {
                let keep = index <= pos || name_of(i) != name;
                index += 1;
                keep
            });
        }
        None => items.push(make()),
    }
}

/// Access context for one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    /// Context name; also names the cluster entry
    pub name: String,
    /// API server URL
    pub server: String,
    /// CA bundle, base64 encoded
    pub certificate_authority_data: Option<String>,
    /// Skip server certificate verification
    pub insecure_skip_tls_verify: bool,
    /// Bearer token
    pub token: String,
    /// Default namespace
    pub namespace: String,
    /// User entry name
    pub user: String,
}

/// Handle on the kubeconfig file holding contexts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextStore {
    path: PathBuf,
}

impl ContextStore {
    /// Store at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store kubectl uses: first `KUBECONFIG` entry, else `~/.kube/config`
    pub fn from_env() -> Result<Self> {
        if let Some(first) = std::env::var_os("KUBECONFIG")
            .as_deref()
            .and_then(|v| std::env::split_paths(v).find(|p| !p.as_os_str().is_empty()))
        {
            return Ok(Self::new(first));
        }
        let home = dirs::home_dir().ok_or_else(|| {
            Error::internal_with_context("context_store", "could not determine home directory")
        })?;
        Ok(Self::new(home.join(".kube").join("config")))
    }

    /// File backing the store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store; a missing file is an empty store
    pub fn load(&self) -> Result<Kubeconfig> {
        if !self.path.exists() {
            return Ok(Kubeconfig::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::context_persist(&self.path, format!("failed to read: {e}")))?;
        if raw.trim().is_empty() {
            return Ok(Kubeconfig::default());
        }
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::context_persist(&self.path, format!("failed to parse: {e}")))
    }

    /// Write the store atomically
    pub fn save(&self, config: &Kubeconfig) -> Result<()> {
        let yaml = serde_yaml::to_string(config)
            .map_err(|e| Error::context_persist(&self.path, format!("failed to serialize: {e}")))?;
        write_atomic(&self.path, yaml.as_bytes())
    }
}

/// Merges context entries into a [`ContextStore`]
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder<'a> {
    store: &'a ContextStore,
}

impl<'a> ContextBuilder<'a> {
    /// Builder writing to `store`
    pub fn new(store: &'a ContextStore) -> Self {
        Self { store }
    }

    /// Load, upsert `entry` by name, optionally make it current, save.
    pub fn upsert(&self, entry: &ContextEntry, set_current: bool) -> Result<()> {
        let mut config = self.store.load()?;
        config.upsert(entry, set_current);
        self.store.save(&config)?;
        info!(
            context = %entry.name,
            path = %self.store.path().display(),
            current = set_current,
            "context saved"
        );
        Ok(())
    }

    /// Point the store's current context at an existing context
    pub fn use_context(&self, name: &str) -> Result<()> {
        let mut config = self.store.load()?;
        if config.context(name).is_none() {
            return Err(Error::validation_for_field(
                name,
                format!("context {name} not found in {}", self.store.path().display()),
            ));
        }
        config.current_context = Some(name.to_string());
        self.store.save(&config)
    }
}
