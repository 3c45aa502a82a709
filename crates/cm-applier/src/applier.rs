//! Upserting rendered bundles
//!
//! [`KubeApplier`] performs get-or-create-or-update per manifest, in order,
//! stopping at the first failure. [`DryRunApplier`] never touches the network
//! and only renders the bundle as text. Callers pick one implementation up
//! front and pass it around as `&dyn Applier`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cm_common::fs::write_atomic;
use cm_common::kube_utils::ResourceRef;
use cm_common::retry::{retry_with_backoff, RetryConfig};
use cm_common::Result;
use serde_json::Value;
use tracing::{debug, info};

use crate::client::{ApiError, ResourceClient};
use crate::template::{Manifest, RenderedBundle};

/// What happened to one manifest
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The resource did not exist and was created
    Created,
    /// The resource existed and differed; it was replaced
    Updated,
    /// The resource already matched the manifest
    Unchanged,
    /// Dry run: the manifest was rendered only
    Rendered,
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Rendered => "rendered",
        };
        f.write_str(s)
    }
}

/// Per-resource log entry
#[derive(Clone, Debug, PartialEq)]
pub struct ApplyRecord {
    /// The resource
    pub resource: ResourceRef,
    /// What happened to it
    pub outcome: ApplyOutcome,
}

/// Ordered result of applying a bundle
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplyReport {
    /// One record per manifest, in apply order
    pub records: Vec<ApplyRecord>,
    /// Rendered text, present for dry runs
    pub rendered: Option<String>,
}

impl ApplyReport {
    /// Number of records with the given outcome
    pub fn count(&self, outcome: ApplyOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    /// The live objects were not modified
    pub fn is_noop(&self) -> bool {
        self.records
            .iter()
            .all(|r| matches!(r.outcome, ApplyOutcome::Unchanged | ApplyOutcome::Rendered))
    }
}

/// Applies rendered bundles
#[async_trait]
pub trait Applier: Send + Sync {
    /// Apply every manifest in order
    async fn apply(&self, bundle: &RenderedBundle) -> Result<ApplyReport>;

    /// Whether this applier only renders
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Upserts manifests against a live API.
///
/// Conflicts, races with deletion and transient failures are retried with
/// backoff. Authorization and validation failures abort immediately, leaving
/// earlier manifests applied.
pub struct KubeApplier {
    client: Arc<dyn ResourceClient>,
    retry: RetryConfig,
}

impl KubeApplier {
    /// Applier with the default retry policy
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self {
            client,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn upsert(&self, manifest: &Manifest) -> std::result::Result<ApplyOutcome, ApiError> {
        let target = &manifest.resource;
        let Some(live) = self.client.get(target).await? else {
            self.client.create(target, &manifest.object).await?;
            return Ok(ApplyOutcome::Created);
        };

        if contains(&live, &manifest.object) {
            return Ok(ApplyOutcome::Unchanged);
        }

        let mut desired = live.clone();
        overlay(&mut desired, &manifest.object);
        if let Some(rv) = live.pointer("/metadata/resourceVersion") {
            if let Some(meta) = desired.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.insert("resourceVersion".to_string(), rv.clone());
            }
        }
        self.client.replace(target, &desired).await?;
        Ok(ApplyOutcome::Updated)
    }
}

#[async_trait]
impl Applier for KubeApplier {
    async fn apply(&self, bundle: &RenderedBundle) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        for manifest in bundle {
            let operation = format!("apply {}", manifest.resource);
            let outcome = retry_with_backoff(&self.retry, &operation, || self.upsert(manifest))
                .await
                .map_err(ApiError::into_error)?;
            info!(resource = %manifest.resource, %outcome, "applied");
            report.records.push(ApplyRecord {
                resource: manifest.resource.clone(),
                outcome,
            });
        }
        Ok(report)
    }
}

/// Renders bundles to text without contacting any cluster.
#[derive(Clone, Debug, Default)]
pub struct DryRunApplier {
    output_file: Option<PathBuf>,
}

impl DryRunApplier {
    /// Dry run returning the text only
    pub fn new() -> Self {
        Self::default()
    }

    /// Dry run that also writes the text to `path`, atomically
    pub fn with_output_file(path: impl Into<PathBuf>) -> Self {
        Self {
            output_file: Some(path.into()),
        }
    }
}

#[async_trait]
impl Applier for DryRunApplier {
    async fn apply(&self, bundle: &RenderedBundle) -> Result<ApplyReport> {
        let text = bundle.to_yaml()?;
        if let Some(path) = &self.output_file {
            write_atomic(path, text.as_bytes())?;
            debug!(path = %path.display(), "wrote rendered manifests");
        }
        Ok(ApplyReport {
            records: bundle
                .manifests()
                .iter()
                .map(|m| ApplyRecord {
                    resource: m.resource.clone(),
                    outcome: ApplyOutcome::Rendered,
                })
                .collect(),
            rendered: Some(text),
        })
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

/// Whether every field in `desired` is present with an equal value in `live`.
///
/// Objects compare key by key; arrays and scalars compare by equality.
pub(crate) fn contains(live: &Value, desired: &Value) -> bool {
    match (live, desired) {
        (Value::Object(l), Value::Object(d)) => d
            .iter()
            .all(|(k, dv)| l.get(k).is_some_and(|lv| contains(lv, dv))),
        _ => live == desired,
    }
}

/// Deep-merge `desired` over `base`; objects merge, everything else replaces.
pub(crate) fn overlay(base: &mut Value, desired: &Value) {
    match (base, desired) {
        (Value::Object(b), Value::Object(d)) => {
            for (k, dv) in d {
                match b.get_mut(k) {
                    Some(bv) => overlay(bv, dv),
                    None => {
                        b.insert(k.clone(), dv.clone());
                    }
                }
            }
        }
        (b, d) => *b = d.clone(),
    }
}
