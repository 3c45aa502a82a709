//! Template rendering into ordered manifest bundles
//!
//! Templates use minijinja syntax with strict undefined handling: a template
//! that references a value absent from the mapping (and not guarded with
//! `default`) fails, and the whole bundle fails with it. Rendering is pure;
//! nothing here talks to a cluster.

use base64::Engine;
use cm_common::kube_utils::{is_cluster_scoped, ResourceRef};
use cm_common::{Error, Result};
use minijinja::{Environment, UndefinedBehavior};
use serde::Deserialize;
use serde_json::Value;

use crate::asset::AssetStore;
use crate::values::ValueMapping;

/// One concrete resource manifest
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    /// Logical path of the template that produced it
    pub source: String,
    /// Address of the resource
    pub resource: ResourceRef,
    /// Full manifest body
    pub object: Value,
}

/// Ordered sequence of manifests; earlier entries are applied first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderedBundle {
    manifests: Vec<Manifest>,
}

impl RenderedBundle {
    /// Build a bundle from already-concrete manifests
    pub fn from_manifests(manifests: Vec<Manifest>) -> Self {
        Self { manifests }
    }

    /// Manifests in apply order
    pub fn manifests(&self) -> &[Manifest] {
        &self.manifests
    }

    /// Number of manifests
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Whether the bundle has no manifests
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    /// Multi-document YAML text, documents separated by `---`.
    ///
    /// Output is deterministic for equal bundles.
    pub fn to_yaml(&self) -> Result<String> {
        let docs = self
            .manifests
            .iter()
            .map(|m| {
                serde_yaml::to_string(&m.object)
                    .map_err(|e| Error::serialization_for_kind(&m.resource.kind, e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(docs.join("---\n"))
    }
}

impl<'a> IntoIterator for &'a RenderedBundle {
    type Item = &'a Manifest;
    type IntoIter = std::slice::Iter<'a, Manifest>;

    fn into_iter(self) -> Self::IntoIter {
        self.manifests.iter()
    }
}

/// Renders embedded templates with a value mapping.
pub struct TemplateRenderer {
    assets: AssetStore,
    env: Environment<'static>,
}

impl TemplateRenderer {
    /// Create a renderer over an asset store
    pub fn new(assets: AssetStore) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("default", default_filter);
        env.add_filter("base64_encode", base64_encode);
        Self { assets, env }
    }

    /// The underlying asset store
    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    /// Render `templates` in order into one bundle.
    ///
    /// Each template may contain several YAML documents; empty documents are
    /// skipped. `namespace` overrides `metadata.namespace` on namespaced kinds.
    pub fn render(
        &self,
        templates: &[&str],
        values: &ValueMapping,
        namespace: Option<&str>,
    ) -> Result<RenderedBundle> {
        let mut manifests = Vec::new();
        for path in templates {
            let text = self.render_text(path, values)?;
            manifests.extend(parse_documents(path, &text, namespace)?);
        }
        Ok(RenderedBundle { manifests })
    }

    /// Render every template under a scenario prefix, in asset order
    pub fn render_scenario(
        &self,
        prefix: &str,
        values: &ValueMapping,
        namespace: Option<&str>,
    ) -> Result<RenderedBundle> {
        let paths = self.assets.paths_under(prefix);
        self.render(&paths, values, namespace)
    }

    /// Substitute values into one template, returning the raw text
    pub fn render_text(&self, path: &str, values: &ValueMapping) -> Result<String> {
        let source = self.assets.get(path)?;
        self.env
            .render_str(source, values.as_map())
            .map_err(|e| Error::render(path, e.to_string()))
    }
}

/// `{{ value | default("fallback") }}`: fallback when undefined or none
fn default_filter(value: minijinja::Value, fallback: minijinja::Value) -> minijinja::Value {
    if value.is_undefined() || value.is_none() {
        fallback
    } else {
        value
    }
}

fn base64_encode(value: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

fn parse_documents(path: &str, text: &str, namespace: Option<&str>) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let mut object = Value::deserialize(doc)
            .map_err(|e| Error::render(path, format!("rendered YAML is invalid: {e}")))?;
        if object.is_null() {
            continue;
        }
        if !object.is_object() {
            return Err(Error::render(path, "rendered document is not a mapping"));
        }

        if let Some(ns) = namespace {
            let kind = object.get("kind").and_then(Value::as_str).unwrap_or_default();
            if !is_cluster_scoped(kind) {
                if let Some(meta) = object.get_mut("metadata").and_then(Value::as_object_mut) {
                    meta.insert("namespace".to_string(), Value::String(ns.to_string()));
                }
            }
        }

        let resource =
            ResourceRef::from_manifest(&object).map_err(|e| Error::render(path, e.to_string()))?;
        manifests.push(Manifest {
            source: path.to_string(),
            resource,
            object,
        });
    }
    Ok(manifests)
}
