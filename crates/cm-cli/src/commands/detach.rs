//! `cm detach cluster` - remove a managed cluster from a hub.
//!
//! # Usage
//!
//! ```bash
//! cm detach cluster --name my-cluster --context hub
//! ```

use std::path::PathBuf;

use clap::{Args, Subcommand};
use cm_clusterpool::detach::{detach_cluster, resolve_cluster};
use cm_clusterpool::scenario;

use super::{load_values, ClusterFlags};
use crate::Result;

/// Detach a cluster
#[derive(Args, Debug)]
pub struct DetachArgs {
    #[command(subcommand)]
    pub target: DetachTarget,
}

#[derive(Subcommand, Debug)]
pub enum DetachTarget {
    /// Delete a cluster's ManagedCluster on the hub
    Cluster(DetachClusterArgs),
}

#[derive(Args, Debug)]
pub struct DetachClusterArgs {
    /// Cluster name
    #[arg(long)]
    pub name: Option<String>,

    /// Values file with `managedCluster.name`
    #[arg(long)]
    pub values: Option<PathBuf>,

    /// Write the values template here and exit
    #[arg(long)]
    pub out_templates_dir: Option<PathBuf>,

    #[command(flatten)]
    pub cluster: ClusterFlags,
}

/// Run the detach command.
pub async fn run(args: DetachArgs) -> Result<()> {
    let DetachTarget::Cluster(detach) = args.target;

    if let Some(dir) = &detach.out_templates_dir {
        for path in scenario::assets().extract_to(scenario::DETACH, dir)? {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let values = load_values(detach.values.as_deref())?;
    let name = resolve_cluster(detach.name.as_deref(), values.as_ref())?;
    let hub = detach.cluster.client().await?;
    if detach_cluster(hub.as_ref(), &name).await? {
        println!("{name} detached");
    } else {
        println!("{name} was not attached to this hub");
    }
    Ok(())
}
