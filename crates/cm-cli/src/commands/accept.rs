//! `cm accept clusters` - approve bootstrap CSRs and accept clusters on a hub.
//!
//! # Usage
//!
//! ```bash
//! cm accept clusters --clusters c1,c2
//! cm accept clusters --values clusters.yaml
//! ```

use std::path::PathBuf;

use clap::{Args, Subcommand};
use cm_clusterpool::accept::{accept_clusters, resolve_clusters};
use cm_clusterpool::scenario;

use super::{load_values, ClusterFlags};
use crate::Result;

/// Accept clusters joining the hub
#[derive(Args, Debug)]
pub struct AcceptArgs {
    #[command(subcommand)]
    pub target: AcceptTarget,
}

#[derive(Subcommand, Debug)]
pub enum AcceptTarget {
    /// Accept the named clusters
    Clusters(AcceptClustersArgs),
}

#[derive(Args, Debug)]
pub struct AcceptClustersArgs {
    /// Comma separated cluster names
    #[arg(long)]
    pub clusters: Option<String>,

    /// Values file with a `clusters` list
    #[arg(long)]
    pub values: Option<PathBuf>,

    /// Write the values template here and exit
    #[arg(long)]
    pub out_templates_dir: Option<PathBuf>,

    #[command(flatten)]
    pub cluster: ClusterFlags,
}

/// Run the accept command.
pub async fn run(args: AcceptArgs) -> Result<()> {
    let AcceptTarget::Clusters(accept) = args.target;

    if let Some(dir) = &accept.out_templates_dir {
        for path in scenario::assets().extract_to(scenario::ACCEPT, dir)? {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let values = load_values(accept.values.as_deref())?;
    let clusters = resolve_clusters(accept.clusters.as_deref(), values.as_ref())?;
    let client = accept.cluster.client().await?;
    for report in accept_clusters(client.as_ref(), &clusters).await? {
        println!("{report}");
    }
    Ok(())
}
