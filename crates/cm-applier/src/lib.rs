//! Render, upsert and wait engine
//!
//! Embedded scenario templates are rendered with a value mapping into an
//! ordered [`RenderedBundle`], applied by an [`Applier`] (real or dry-run) and
//! followed by [`wait`] polls for asynchronous state transitions.

#![deny(missing_docs)]

pub mod applier;
pub mod asset;
pub mod client;
pub mod template;
pub mod values;
pub mod wait;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use applier::{Applier, ApplyOutcome, ApplyRecord, ApplyReport, DryRunApplier, KubeApplier};
pub use asset::AssetStore;
pub use client::{
    ApiError, KubeResourceClient, KubeTargetConnector, ListQuery, ResourceClient, TargetConnector,
};
pub use template::{Manifest, RenderedBundle, TemplateRenderer};
pub use values::ValueMapping;
pub use wait::{poll_until, wait_for_resource, WaitError, WaitOptions};
