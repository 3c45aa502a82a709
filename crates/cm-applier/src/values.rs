//! Nested value mapping fed to template rendering

use std::path::Path;

use cm_common::{Error, Result};
use serde_json::{Map, Value};

/// Nested key -> value structure addressed by dotted paths
/// (`managedCluster.name`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueMapping {
    root: Map<String, Value>,
}

impl ValueMapping {
    /// Empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML values document. An empty document is a validation error.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml)
            .map_err(|e| Error::validation(format!("values are not valid YAML: {e}")))?;
        match value {
            Value::Null => Err(Error::validation("values are missing")),
            Value::Object(root) if root.is_empty() => Err(Error::validation("values are missing")),
            Value::Object(root) => Ok(Self { root }),
            _ => Err(Error::validation("values must be a mapping")),
        }
    }

    /// Read a user-supplied values file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::validation_for_field(
                path.display().to_string(),
                format!("cannot read values file: {e}"),
            )
        })?;
        Self::from_yaml_str(&text)
    }

    /// Set the value at a dotted path, creating intermediate mappings.
    ///
    /// A non-mapping value in the middle of the path is replaced.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> &mut Self {
        let mut segments = path.split('.').peekable();
        let mut cursor = &mut self.root;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                cursor.insert(segment.to_string(), value.into());
                break;
            }
            let slot = cursor
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            // `slot` was just made an object
            let Value::Object(next) = slot else { break };
            cursor = next;
        }
        self
    }

    /// Builder-style [`set`](Self::set)
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set(path, value);
        self
    }

    /// Value at a dotted path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        segments.try_fold(self.root.get(first)?, |v, seg| v.get(seg))
    }

    /// String at a dotted path
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Integer at a dotted path
    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    /// The mapping as a JSON object, the rendering context
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }
}

impl From<Map<String, Value>> for ValueMapping {
    fn from(root: Map<String, Value>) -> Self {
        Self { root }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_and_get_nested_paths() {
        let values = ValueMapping::new()
            .with("managedCluster.name", "foo")
            .with("managedCluster.replicas", 3);

        assert_eq!(values.get_str("managedCluster.name"), Some("foo"));
        assert_eq!(values.get_i64("managedCluster.replicas"), Some(3));
        assert!(values.get("managedCluster.missing").is_none());
        assert_eq!(
            Value::Object(values.as_map().clone()),
            json!({"managedCluster": {"name": "foo", "replicas": 3}})
        );
    }

    #[test]
    fn set_replaces_scalar_in_the_way() {
        let mut values = ValueMapping::new().with("a", 1);
        values.set("a.b", "x");
        assert_eq!(values.get_str("a.b"), Some("x"));
    }

    #[test]
    fn empty_values_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.yaml");
        std::fs::write(&path, "").unwrap();

        let err = ValueMapping::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("values are missing"));
    }

    #[test]
    fn values_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.yaml");
        std::fs::write(&path, "managedCluster:\n  name: foo\n  replicas: 2\n").unwrap();

        let values = ValueMapping::from_file(&path).unwrap();
        assert_eq!(values.get_str("managedCluster.name"), Some("foo"));
        assert_eq!(values.get_i64("managedCluster.replicas"), Some(2));
    }

    #[test]
    fn scalar_document_is_rejected() {
        assert!(matches!(
            ValueMapping::from_yaml_str("just a string"),
            Err(Error::Validation { .. })
        ));
    }
}
