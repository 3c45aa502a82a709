//! Cluster pool hosts and their persisted registry
//!
//! The registry lives at `~/.cm/clusterpoolhosts.json` (or under
//! `$CM_CONFIG_DIR`) and records every known pool-hosting cluster plus the
//! current one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cm_common::fs::write_atomic;
use cm_common::{Error, Result};
use serde::{Deserialize, Serialize};

const CONFIG_DIR_NAME: &str = ".cm";
const CONFIG_DIR_ENV: &str = "CM_CONFIG_DIR";
const HOSTS_FILE_NAME: &str = "clusterpoolhosts.json";

/// A cluster hosting one or more cluster pools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPoolHost {
    /// Registry name
    pub name: String,
    /// API server URL
    pub api_server: String,
    /// Web console URL
    #[serde(default)]
    pub console: String,
    /// Namespace holding the pools and claims
    pub namespace: String,
    /// Group granted access to claims
    #[serde(default)]
    pub group: String,
    /// Kubeconfig context used to reach the host; the host name when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ClusterPoolHost {
    /// Kubeconfig context that reaches this host
    pub fn kube_context(&self) -> &str {
        self.context.as_deref().unwrap_or(&self.name)
    }

    /// Context name for a claimed cluster reached through this host
    pub fn context_name_for(&self, claim: &str) -> String {
        format!("{}/{}", self.name, claim)
    }

    /// Service account name from the authenticated username on this host.
    ///
    /// Pool users authenticate as `system:serviceaccount:<namespace>:<name>`;
    /// anything else is returned unchanged.
    pub fn service_account_name(&self, username: &str) -> String {
        let prefix = format!("system:serviceaccount:{}:", self.namespace);
        username
            .strip_prefix(&prefix)
            .unwrap_or(username)
            .to_string()
    }
}

/// Persisted set of cluster pool hosts with a current pointer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPoolHosts {
    /// Name of the current host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    /// Hosts by name
    #[serde(default)]
    pub hosts: BTreeMap<String, ClusterPoolHost>,
}

/// Directory holding cm configuration: `$CM_CONFIG_DIR` or `~/.cm`
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = dirs::home_dir().ok_or_else(|| {
        Error::internal_with_context("config_dir", "could not determine home directory")
    })?;
    Ok(home.join(CONFIG_DIR_NAME))
}

impl ClusterPoolHosts {
    /// Default registry location
    pub fn default_path() -> Result<PathBuf> {
        Ok(config_dir()?.join(HOSTS_FILE_NAME))
    }

    /// Load the registry, returning an empty one if the file is missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::context_persist(path, format!("failed to read: {e}")))?;
        serde_json::from_str(&data)
            .map_err(|e| Error::context_persist(path, format!("failed to parse: {e}")))
    }

    /// Write the registry atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| Error::serialization(format!("failed to serialize hosts: {e}")))?;
        write_atomic(path, data.as_bytes())
    }

    /// Insert or replace a host
    pub fn upsert(&mut self, host: ClusterPoolHost) {
        self.hosts.insert(host.name.clone(), host);
    }

    /// Look up a host by name, or the current host when `name` is `None`
    pub fn get_or_current(&self, name: Option<&str>) -> Result<&ClusterPoolHost> {
        let name = match name.filter(|n| !n.is_empty()) {
            Some(n) => n,
            None => self
                .current
                .as_deref()
                .ok_or_else(|| Error::validation("no current cluster pool host is set"))?,
        };
        self.hosts.get(name).ok_or_else(|| {
            Error::validation_for_field(name, format!("cluster pool host {name} not found"))
        })
    }

    /// Make `name` the current host
    pub fn set_current(&mut self, name: &str) -> Result<()> {
        if !self.hosts.contains_key(name) {
            return Err(Error::validation_for_field(
                name,
                format!("cluster pool host {name} not found"),
            ));
        }
        self.current = Some(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> ClusterPoolHost {
        ClusterPoolHost {
            name: name.to_string(),
            api_server: format!("https://api.{name}.example.com:6443"),
            console: String::new(),
            namespace: "pools".to_string(),
            group: "devs".to_string(),
            context: None,
        }
    }

    #[test]
    fn service_account_prefix_is_stripped() {
        let h = host("dev");
        assert_eq!(
            h.service_account_name("system:serviceaccount:pools:alice"),
            "alice"
        );
        assert_eq!(
            h.service_account_name("system:serviceaccount:other:alice"),
            "system:serviceaccount:other:alice"
        );
        assert_eq!(h.service_account_name("kube:admin"), "kube:admin");
    }

    #[test]
    fn context_names_are_scoped_by_host() {
        assert_eq!(host("dev").context_name_for("claim-1"), "dev/claim-1");
        assert_eq!(host("dev").kube_context(), "dev");
    }

    #[test]
    fn registry_save_load_and_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusterpoolhosts.json");

        let mut hosts = ClusterPoolHosts::load(&path).unwrap();
        assert!(hosts.hosts.is_empty());
        hosts.upsert(host("dev"));
        hosts.upsert(host("prod"));
        hosts.set_current("prod").unwrap();
        hosts.save(&path).unwrap();

        let loaded = ClusterPoolHosts::load(&path).unwrap();
        assert_eq!(loaded, hosts);
        assert_eq!(loaded.get_or_current(None).unwrap().name, "prod");
        assert_eq!(loaded.get_or_current(Some("dev")).unwrap().name, "dev");
    }

    #[test]
    fn unknown_host_is_rejected() {
        let mut hosts = ClusterPoolHosts::default();
        assert!(hosts.get_or_current(None).is_err());
        assert!(hosts.set_current("nope").is_err());
        hosts.upsert(host("dev"));
        assert!(matches!(
            hosts.get_or_current(Some("nope")),
            Err(Error::Validation { .. })
        ));
    }
}
