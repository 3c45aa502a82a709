//! Embedded template bundles addressed by logical path

use std::path::{Path, PathBuf};

use cm_common::{Error, Result};
use tracing::debug;

/// Read-only store of template text embedded at build time.
///
/// Paths are `<scenario>/<file>`, e.g. `create/cluster/sa.yaml`.
#[derive(Clone, Copy, Debug)]
pub struct AssetStore {
    assets: &'static [(&'static str, &'static str)],
}

impl AssetStore {
    /// Wrap a static table of `(path, contents)` pairs
    pub const fn new(assets: &'static [(&'static str, &'static str)]) -> Self {
        Self { assets }
    }

    /// Raw text of the asset at `path`
    pub fn get(&self, path: &str) -> Result<&'static str> {
        self.assets
            .iter()
            .find(|(p, _)| *p == path)
            .map(|(_, contents)| *contents)
            .ok_or_else(|| Error::render(path, "template not found"))
    }

    /// All asset paths under `prefix`, in table order
    pub fn paths_under(&self, prefix: &str) -> Vec<&'static str> {
        let prefix = prefix.trim_end_matches('/');
        self.assets
            .iter()
            .map(|(p, _)| *p)
            .filter(|p| {
                prefix.is_empty()
                    || p.strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .collect()
    }

    /// Copy every asset under `prefix` into `dir`, keeping relative paths.
    ///
    /// Returns the written file paths. Fails with a render error when nothing
    /// matches the prefix.
    pub fn extract_to(&self, prefix: &str, dir: &Path) -> Result<Vec<PathBuf>> {
        let paths = self.paths_under(prefix);
        if paths.is_empty() {
            return Err(Error::render(prefix, "no templates under prefix"));
        }

        let mut written = Vec::with_capacity(paths.len());
        for path in paths {
            let contents = self.get(path)?;
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::internal_with_context(
                        "extract_templates",
                        format!("create {}: {e}", parent.display()),
                    )
                })?;
            }
            std::fs::write(&target, contents).map_err(|e| {
                Error::internal_with_context(
                    "extract_templates",
                    format!("write {}: {e}", target.display()),
                )
            })?;
            debug!(path = %target.display(), "extracted template");
            written.push(target);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSETS: &[(&str, &str)] = &[
        ("create/cluster/sa.yaml", "kind: ServiceAccount\n"),
        ("create/cluster/secret-token.yaml", "kind: Secret\n"),
        ("create/clusterclaim/claim.yaml", "kind: ClusterClaim\n"),
        ("scale/values-template.yaml", "managedCluster: {}\n"),
    ];

    #[test]
    fn get_known_and_unknown_paths() {
        let store = AssetStore::new(ASSETS);
        assert_eq!(store.get("create/cluster/sa.yaml").unwrap(), "kind: ServiceAccount\n");
        assert!(matches!(
            store.get("create/cluster/missing.yaml"),
            Err(Error::Render { .. })
        ));
    }

    #[test]
    fn prefix_matches_whole_segments_only() {
        let store = AssetStore::new(ASSETS);
        assert_eq!(
            store.paths_under("create/cluster"),
            vec!["create/cluster/sa.yaml", "create/cluster/secret-token.yaml"]
        );
        assert_eq!(store.paths_under("create/").len(), 3);
        assert_eq!(store.paths_under("").len(), 4);
    }

    #[test]
    fn extract_writes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(ASSETS);

        let written = store.extract_to("scale", dir.path()).unwrap();

        assert_eq!(written, vec![dir.path().join("scale/values-template.yaml")]);
        let text = std::fs::read_to_string(&written[0]).unwrap();
        assert_eq!(text, "managedCluster: {}\n");
    }

    #[test]
    fn extract_unknown_prefix_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(ASSETS);
        assert!(store.extract_to("join", dir.path()).is_err());
    }
}
