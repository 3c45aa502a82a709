//! Error types for cm flows
//!
//! Errors are structured with fields to aid diagnosis. Each variant maps to one
//! failure category with its own handling rule: validation and render errors
//! never touch the network, apply errors carry a retry classification, and wait
//! errors surface the last state observed before giving up.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Classification of a failed remote write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyErrorKind {
    /// Optimistic-lock conflict or create race (409)
    Conflict,
    /// Authentication or authorization rejected the request (401/403)
    Forbidden,
    /// The server rejected the object as malformed (400/422)
    Invalid,
    /// The object disappeared between read and write (404)
    NotFoundDuringCreate,
    /// Network failure, throttling or server-side error (429/5xx)
    Transient,
}

impl ApplyErrorKind {
    /// Whether an operation failing with this kind may be retried
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Conflict | Self::NotFoundDuringCreate | Self::Transient
        )
    }
}

impl fmt::Display for ApplyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Conflict => "conflict",
            Self::Forbidden => "forbidden",
            Self::Invalid => "invalid",
            Self::NotFoundDuringCreate => "not-found-during-create",
            Self::Transient => "transient",
        };
        f.write_str(s)
    }
}

/// Main error type for cm operations
#[derive(Debug, Error)]
pub enum Error {
    /// A required input value is missing or malformed
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The offending value path (e.g., "managedCluster.replicas")
        field: Option<String>,
    },

    /// A template could not be rendered into a manifest
    #[error("render error in {template}: {message}")]
    Render {
        /// Logical path of the template
        template: String,
        /// Description of what failed
        message: String,
    },

    /// A remote write failed
    #[error("apply error [{kind}] on {resource}: {message}")]
    Apply {
        /// Retry classification
        kind: ApplyErrorKind,
        /// The resource being written (Kind/namespace/name)
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// A wait deadline elapsed before the success predicate held
    #[error(
        "timed out after {timeout:?} waiting for {resource} (last observed: {})",
        .last_observed.as_deref().unwrap_or("nothing")
    )]
    WaitTimeout {
        /// The resource being watched
        resource: String,
        /// Debug rendering of the last observed state, if any was observed
        last_observed: Option<String>,
        /// The configured deadline
        timeout: Duration,
    },

    /// A wait was aborted through its cancellation signal
    #[error(
        "wait for {resource} cancelled (last observed: {})",
        .last_observed.as_deref().unwrap_or("nothing")
    )]
    WaitCancelled {
        /// The resource being watched
        resource: String,
        /// Debug rendering of the last observed state, if any was observed
        last_observed: Option<String>,
    },

    /// The token secret was created but its token field never appeared
    #[error("token extraction failed for secret {secret}: {message}")]
    TokenExtraction {
        /// Secret namespace/name
        secret: String,
        /// Description of what failed
        message: String,
    },

    /// The persisted credential store could not be read or written
    #[error("context store {}: {message}", .path.display())]
    ContextPersist {
        /// Path of the store
        path: PathBuf,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A multi-stage flow failed at the named stage
    #[error("{stage} failed: {source}")]
    Failed {
        /// Stage of the flow that failed
        stage: String,
        /// The underlying cause
        source: Box<Error>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific value path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a render error for a template
    pub fn render(template: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Render {
            template: template.into(),
            message: msg.into(),
        }
    }

    /// Create an apply error
    pub fn apply(
        kind: ApplyErrorKind,
        resource: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Apply {
            kind,
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a token extraction error
    pub fn token_extraction(secret: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TokenExtraction {
            secret: secret.into(),
            message: msg.into(),
        }
    }

    /// Create a context store error
    pub fn context_persist(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::ContextPersist {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a resource kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Wrap an error with the flow stage at which it happened
    pub fn failed(stage: impl Into<String>, source: Error) -> Self {
        Self::Failed {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Whether retrying the failed operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Apply { kind, .. } => kind.is_retryable(),
            Self::Failed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The innermost cause, unwrapping flow stages
    pub fn root(&self) -> &Error {
        match self {
            Self::Failed { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: bad input is rejected with the field that caused it
    #[test]
    fn story_validation_names_the_field() {
        let err = Error::validation_for_field("managedCluster.replicas", "must be >= 0");
        assert!(err.to_string().contains("validation error"));
        match err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("managedCluster.replicas"))
            }
            _ => panic!("Expected Validation variant"),
        }
    }

    /// Story: apply errors carry their retry classification
    #[test]
    fn story_apply_error_classification() {
        let conflict = Error::apply(ApplyErrorKind::Conflict, "Secret/default/t", "409");
        assert!(conflict.is_retryable());
        assert!(conflict.to_string().contains("[conflict]"));

        let forbidden = Error::apply(ApplyErrorKind::Forbidden, "Secret/default/t", "403");
        assert!(!forbidden.is_retryable());

        assert!(ApplyErrorKind::NotFoundDuringCreate.is_retryable());
        assert!(ApplyErrorKind::Transient.is_retryable());
        assert!(!ApplyErrorKind::Invalid.is_retryable());
    }

    /// Story: timeouts say what was last seen
    #[test]
    fn story_wait_timeout_reports_last_observed() {
        let err = Error::WaitTimeout {
            resource: "ClusterClaim/pool/dev-1".to_string(),
            last_observed: Some("Resuming".to_string()),
            timeout: Duration::from_secs(60),
        };
        let msg = err.to_string();
        assert!(msg.contains("ClusterClaim/pool/dev-1"));
        assert!(msg.contains("Resuming"));

        let err = Error::WaitTimeout {
            resource: "x".to_string(),
            last_observed: None,
            timeout: Duration::from_secs(1),
        };
        assert!(err.to_string().contains("nothing"));
    }

    /// Story: flow failures keep the stage and the underlying cause
    #[test]
    fn story_failed_stage_wraps_cause() {
        let cause = Error::token_extraction("default/cm-token", "missing data.token");
        let err = Error::failed("token-exchange", cause);
        assert!(err.to_string().starts_with("token-exchange failed"));
        assert!(matches!(err.root(), Error::TokenExtraction { .. }));
        assert!(!err.is_retryable());

        let retryable = Error::failed(
            "resume",
            Error::apply(ApplyErrorKind::Transient, "ClusterClaim/pool/a", "503"),
        );
        assert!(retryable.is_retryable());
    }

    #[test]
    fn context_persist_mentions_path() {
        let err = Error::context_persist("/tmp/kubeconfig", "permission denied");
        assert!(err.to_string().contains("/tmp/kubeconfig"));
        assert!(err.to_string().contains("permission denied"));
    }
}
