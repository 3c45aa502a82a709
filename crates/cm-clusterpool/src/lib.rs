//! Cluster pool flows
//!
//! The centerpiece is [`federation`]: resume a claimed cluster, wait for it to
//! run, exchange pool credentials for a service-account token on the claimed
//! cluster and persist a kubeconfig context for it. [`power`], [`scale`] and
//! [`accept`] are smaller day-2 flows over the same render/apply/wait engine;
//! [`join`] and [`detach`] install and remove a cluster's hub registration.

#![deny(missing_docs)]

pub mod accept;
pub mod claim;
pub mod context;
pub mod detach;
pub mod federation;
pub mod host;
pub mod join;
pub mod power;
pub mod scale;
pub mod scenario;

pub use context::{ContextBuilder, ContextEntry, ContextStore};
pub use federation::{
    render_credentials, AttachOptions, AttachOutcome, Federation, FederationState, Stage,
    TokenExchange,
};
pub use host::{ClusterPoolHost, ClusterPoolHosts};
