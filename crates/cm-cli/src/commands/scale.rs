//! `cm scale cluster` - set a cluster's worker replica count.
//!
//! # Usage
//!
//! ```bash
//! cm scale cluster --name my-cluster --replicas 3
//!
//! # Start from the values template
//! cm scale cluster --out-templates-dir /tmp/scale
//! cm scale cluster --values /tmp/scale/scale/cluster/values-template.yaml
//! ```

use std::path::PathBuf;

use clap::{Args, Subcommand};
use cm_clusterpool::scale::{scale, ScaleValues, UNSET_REPLICAS};
use cm_clusterpool::scenario;

use super::{load_values, ClusterFlags};
use crate::Result;

/// Scale a cluster
#[derive(Args, Debug)]
pub struct ScaleArgs {
    #[command(subcommand)]
    pub target: ScaleTarget,
}

#[derive(Subcommand, Debug)]
pub enum ScaleTarget {
    /// Scale a cluster's worker machine pool
    Cluster(ScaleClusterArgs),
}

#[derive(Args, Debug)]
pub struct ScaleClusterArgs {
    /// Cluster name
    #[arg(long)]
    pub name: Option<String>,

    /// Desired number of workers
    #[arg(long, default_value_t = UNSET_REPLICAS, allow_negative_numbers = true)]
    pub replicas: i64,

    /// Values file with `managedCluster.name` and `managedCluster.replicas`
    #[arg(long)]
    pub values: Option<PathBuf>,

    /// Write the values template here and exit
    #[arg(long)]
    pub out_templates_dir: Option<PathBuf>,

    #[command(flatten)]
    pub cluster: ClusterFlags,
}

/// Run the scale command.
pub async fn run(args: ScaleArgs) -> Result<()> {
    let ScaleTarget::Cluster(cluster) = args.target;

    if let Some(dir) = &cluster.out_templates_dir {
        for path in scenario::assets().extract_to(scenario::SCALE, dir)? {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let values = load_values(cluster.values.as_deref())?;
    let resolved =
        ScaleValues::resolve(cluster.name.as_deref(), cluster.replicas, values.as_ref())?;
    let client = cluster.cluster.client().await?;
    scale(client.as_ref(), &resolved).await?;
    println!(
        "{} scaled to {} replicas",
        resolved.cluster_name, resolved.replicas
    );
    Ok(())
}
