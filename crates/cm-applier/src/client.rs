//! Remote API seam
//!
//! Flows talk to clusters only through [`ResourceClient`]. The kube-backed
//! implementation classifies every `kube::Error` into an [`ApiError`] so retry
//! and wait logic can decide between retrying and failing fast.

use std::sync::Arc;

use async_trait::async_trait;
use cm_common::kube_utils::{build_api_resource, client_from_kubeconfig_yaml, ResourceRef};
use cm_common::retry::Retryable;
use cm_common::{ApplyErrorKind, Error, Result, FIELD_MANAGER};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::debug;

/// A classified remote API failure
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum ApiError {
    /// The resource does not exist (404)
    #[error("{resource} not found")]
    NotFound {
        /// Resource address
        resource: String,
    },
    /// Optimistic-lock conflict or already-exists (409)
    #[error("conflict on {resource}: {message}")]
    Conflict {
        /// Resource address
        resource: String,
        /// Server message
        message: String,
    },
    /// Unauthenticated or unauthorized (401/403)
    #[error("forbidden on {resource}: {message}")]
    Forbidden {
        /// Resource address
        resource: String,
        /// Server message
        message: String,
    },
    /// Rejected as malformed (400/422)
    #[error("invalid {resource}: {message}")]
    Invalid {
        /// Resource address
        resource: String,
        /// Server message
        message: String,
    },
    /// Network failure, throttling or server error
    #[error("transient failure on {resource}: {message}")]
    Transient {
        /// Resource address
        resource: String,
        /// Description of the failure
        message: String,
    },
}

impl ApiError {
    /// Not-found error for a resource
    pub fn not_found(resource: &ResourceRef) -> Self {
        Self::NotFound {
            resource: resource.to_string(),
        }
    }

    /// Conflict error for a resource
    pub fn conflict(resource: &ResourceRef, msg: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.to_string(),
            message: msg.into(),
        }
    }

    /// Forbidden error for a resource
    pub fn forbidden(resource: &ResourceRef, msg: impl Into<String>) -> Self {
        Self::Forbidden {
            resource: resource.to_string(),
            message: msg.into(),
        }
    }

    /// Invalid error for a resource
    pub fn invalid(resource: &ResourceRef, msg: impl Into<String>) -> Self {
        Self::Invalid {
            resource: resource.to_string(),
            message: msg.into(),
        }
    }

    /// Transient error for a resource
    pub fn transient(resource: &ResourceRef, msg: impl Into<String>) -> Self {
        Self::Transient {
            resource: resource.to_string(),
            message: msg.into(),
        }
    }

    /// The write-failure classification of this error
    pub fn kind(&self) -> ApplyErrorKind {
        match self {
            Self::NotFound { .. } => ApplyErrorKind::NotFoundDuringCreate,
            Self::Conflict { .. } => ApplyErrorKind::Conflict,
            Self::Forbidden { .. } => ApplyErrorKind::Forbidden,
            Self::Invalid { .. } => ApplyErrorKind::Invalid,
            Self::Transient { .. } => ApplyErrorKind::Transient,
        }
    }

    /// Whether this is a 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Convert into the crate-wide error type
    pub fn into_error(self) -> Error {
        let kind = self.kind();
        match self {
            Self::NotFound { resource } => Error::apply(kind, resource, "not found"),
            Self::Conflict { resource, message }
            | Self::Forbidden { resource, message }
            | Self::Invalid { resource, message }
            | Self::Transient { resource, message } => Error::apply(kind, resource, message),
        }
    }

    /// Classify a kube-rs error by HTTP status; anything without a status is
    /// a network failure and counts as transient.
    pub fn from_kube(resource: &ResourceRef, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => Self::not_found(resource),
                409 => Self::conflict(resource, resp.message),
                401 | 403 => Self::forbidden(resource, resp.message),
                400 | 422 => Self::invalid(resource, resp.message),
                _ => Self::transient(resource, format!("{} ({})", resp.message, resp.code)),
            },
            other => Self::transient(resource, other.to_string()),
        }
    }
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        err.into_error()
    }
}

/// Selector for a list call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListQuery {
    /// API version of the listed kind
    pub api_version: String,
    /// Listed kind
    pub kind: String,
    /// Restrict to one namespace; `None` lists across namespaces or a
    /// cluster-scoped kind
    pub namespace: Option<String>,
    /// Label selector, e.g. `app=foo,tier!=db`
    pub label_selector: Option<String>,
    /// Field selector, e.g. `metadata.name=foo`
    pub field_selector: Option<String>,
}

impl ListQuery {
    /// List every object of a kind
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Restrict to a namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Filter by label selector
    pub fn labels(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    /// Filter by field selector
    pub fn fields(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    fn describe(&self) -> ResourceRef {
        ResourceRef {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: "*".to_string(),
        }
    }
}

/// Resource-oriented access to one API endpoint.
///
/// Objects are exchanged as untyped JSON manifests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch a resource; `Ok(None)` when it does not exist
    async fn get(&self, target: &ResourceRef) -> std::result::Result<Option<Value>, ApiError>;

    /// List resources matching a query
    async fn list(&self, query: &ListQuery) -> std::result::Result<Vec<Value>, ApiError>;

    /// Create a resource
    async fn create(
        &self,
        target: &ResourceRef,
        manifest: &Value,
    ) -> std::result::Result<Value, ApiError>;

    /// Replace a resource; `metadata.resourceVersion` in the manifest guards
    /// against lost updates
    async fn replace(
        &self,
        target: &ResourceRef,
        manifest: &Value,
    ) -> std::result::Result<Value, ApiError>;

    /// Apply an RFC 7386 JSON merge patch
    async fn merge_patch(
        &self,
        target: &ResourceRef,
        patch: &Value,
    ) -> std::result::Result<Value, ApiError>;

    /// Replace a subresource (`status`, `approval`, ...)
    async fn replace_subresource(
        &self,
        target: &ResourceRef,
        subresource: &str,
        body: &Value,
    ) -> std::result::Result<Value, ApiError>;

    /// Delete a resource
    async fn delete(&self, target: &ResourceRef) -> std::result::Result<(), ApiError>;
}

/// [`ResourceClient`] backed by a `kube::Client`
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, api_version: &str, kind: &str, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = build_api_resource(api_version, kind);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn api_for(&self, target: &ResourceRef) -> Api<DynamicObject> {
        self.api(&target.api_version, &target.kind, target.namespace.as_deref())
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

fn to_dynamic(
    target: &ResourceRef,
    manifest: &Value,
) -> std::result::Result<DynamicObject, ApiError> {
    serde_json::from_value(manifest.clone())
        .map_err(|e| ApiError::invalid(target, format!("manifest is not an object: {e}")))
}

fn to_value(target: &ResourceRef, obj: DynamicObject) -> std::result::Result<Value, ApiError> {
    serde_json::to_value(obj)
        .map_err(|e| ApiError::invalid(target, format!("response is not serializable: {e}")))
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(&self, target: &ResourceRef) -> std::result::Result<Option<Value>, ApiError> {
        debug!(resource = %target, "get");
        let found = self
            .api_for(target)
            .get_opt(&target.name)
            .await
            .map_err(|e| ApiError::from_kube(target, e))?;
        found.map(|obj| to_value(target, obj)).transpose()
    }

    async fn list(&self, query: &ListQuery) -> std::result::Result<Vec<Value>, ApiError> {
        let described = query.describe();
        debug!(resource = %described, labels = ?query.label_selector, "list");
        let mut lp = ListParams::default();
        if let Some(labels) = &query.label_selector {
            lp = lp.labels(labels);
        }
        if let Some(fields) = &query.field_selector {
            lp = lp.fields(fields);
        }
        let list = self
            .api(&query.api_version, &query.kind, query.namespace.as_deref())
            .list(&lp)
            .await
            .map_err(|e| ApiError::from_kube(&described, e))?;
        list.items
            .into_iter()
            .map(|obj| to_value(&described, obj))
            .collect()
    }

    async fn create(
        &self,
        target: &ResourceRef,
        manifest: &Value,
    ) -> std::result::Result<Value, ApiError> {
        debug!(resource = %target, "create");
        let obj = to_dynamic(target, manifest)?;
        let created = self
            .api_for(target)
            .create(&post_params(), &obj)
            .await
            .map_err(|e| ApiError::from_kube(target, e))?;
        to_value(target, created)
    }

    async fn replace(
        &self,
        target: &ResourceRef,
        manifest: &Value,
    ) -> std::result::Result<Value, ApiError> {
        debug!(resource = %target, "replace");
        let obj = to_dynamic(target, manifest)?;
        let replaced = self
            .api_for(target)
            .replace(&target.name, &post_params(), &obj)
            .await
            .map_err(|e| ApiError::from_kube(target, e))?;
        to_value(target, replaced)
    }

    async fn merge_patch(
        &self,
        target: &ResourceRef,
        patch: &Value,
    ) -> std::result::Result<Value, ApiError> {
        debug!(resource = %target, "merge patch");
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let patched = self
            .api_for(target)
            .patch(&target.name, &params, &Patch::Merge(patch))
            .await
            .map_err(|e| ApiError::from_kube(target, e))?;
        to_value(target, patched)
    }

    async fn replace_subresource(
        &self,
        target: &ResourceRef,
        subresource: &str,
        body: &Value,
    ) -> std::result::Result<Value, ApiError> {
        debug!(resource = %target, subresource, "replace subresource");
        let data = serde_json::to_vec(body)
            .map_err(|e| ApiError::invalid(target, format!("body is not serializable: {e}")))?;
        let replaced = self
            .api_for(target)
            .replace_subresource(subresource, &target.name, &post_params(), data)
            .await
            .map_err(|e| ApiError::from_kube(target, e))?;
        to_value(target, replaced)
    }

    async fn delete(&self, target: &ResourceRef) -> std::result::Result<(), ApiError> {
        debug!(resource = %target, "delete");
        self.api_for(target)
            .delete(&target.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| ApiError::from_kube(target, e))
    }
}

/// Opens a [`ResourceClient`] on a cluster given its kubeconfig document
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TargetConnector: Send + Sync {
    /// Connect using an admin kubeconfig (YAML text)
    async fn connect(&self, kubeconfig_yaml: &str) -> Result<Arc<dyn ResourceClient>>;
}

/// [`TargetConnector`] creating real kube clients
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeTargetConnector;

#[async_trait]
impl TargetConnector for KubeTargetConnector {
    async fn connect(&self, kubeconfig_yaml: &str) -> Result<Arc<dyn ResourceClient>> {
        let client = client_from_kubeconfig_yaml(kubeconfig_yaml).await?;
        Ok(Arc::new(KubeResourceClient::new(client)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;
    use rstest::rstest;

    fn secret() -> ResourceRef {
        ResourceRef::namespaced("v1", "Secret", "default", "token")
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: String::new(),
            code,
        })
    }

    #[rstest]
    #[case(404, ApplyErrorKind::NotFoundDuringCreate, true)]
    #[case(409, ApplyErrorKind::Conflict, true)]
    #[case(403, ApplyErrorKind::Forbidden, false)]
    #[case(401, ApplyErrorKind::Forbidden, false)]
    #[case(422, ApplyErrorKind::Invalid, false)]
    #[case(500, ApplyErrorKind::Transient, true)]
    #[case(429, ApplyErrorKind::Transient, true)]
    fn test_classify_status_codes(
        #[case] code: u16,
        #[case] kind: ApplyErrorKind,
        #[case] retryable: bool,
    ) {
        let err = ApiError::from_kube(&secret(), api_error(code));
        assert_eq!(err.kind(), kind);
        assert_eq!(err.is_retryable(), retryable);
    }

    #[test]
    fn test_into_error_keeps_resource_and_kind() {
        let err = ApiError::forbidden(&secret(), "no").into_error();
        match err {
            Error::Apply { kind, resource, .. } => {
                assert_eq!(kind, ApplyErrorKind::Forbidden);
                assert_eq!(resource, "Secret/default/token");
            }
            other => panic!("expected apply error, got {other:?}"),
        }
    }

    #[test]
    fn test_list_query_builder() {
        let q = ListQuery::new("certificates.k8s.io/v1", "CertificateSigningRequest")
            .labels("open-cluster-management.io/cluster-name=foo");
        assert_eq!(q.namespace, None);
        assert_eq!(q.describe().to_string(), "CertificateSigningRequest/*");
    }
}
