//! Common types for cm: errors, retry, filesystem and Kubernetes utilities

#![deny(missing_docs)]

pub mod error;
pub mod fs;
pub mod kube_utils;
pub mod retry;

pub use error::{ApplyErrorKind, Error};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace where exchanged service identities are created on a target cluster
pub const DEFAULT_NAMESPACE: &str = "default";

/// Field manager / user agent name used for writes
pub const FIELD_MANAGER: &str = "cm";
