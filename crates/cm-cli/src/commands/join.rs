//! `cm join hub` - install the klusterlet bootstrap so a cluster joins a hub.
//!
//! # Usage
//!
//! ```bash
//! cm join hub --name my-cluster --hub-token "$TOKEN" \
//!     --hub-server-internal https://api.hub.example.com:6443
//!
//! # Review the manifests first
//! cm join hub --values join.yaml --dry-run --output-file join-rendered.yaml
//! ```

use std::path::PathBuf;

use clap::{Args, Subcommand};
use cm_applier::{Applier, DryRunApplier, KubeApplier};
use cm_clusterpool::join::{join_hub, JoinFlags, JoinValues};
use cm_clusterpool::scenario;

use super::{load_values, ClusterFlags};
use crate::Result;

/// Join a hub
#[derive(Args, Debug)]
pub struct JoinArgs {
    #[command(subcommand)]
    pub target: JoinTarget,
}

#[derive(Subcommand, Debug)]
pub enum JoinTarget {
    /// Register the selected cluster with a hub
    Hub(JoinHubArgs),
}

#[derive(Args, Debug)]
pub struct JoinHubArgs {
    /// Name the cluster registers under
    #[arg(long)]
    pub name: Option<String>,

    /// Bootstrap token issued by the hub
    #[arg(long, env = "CM_HUB_TOKEN", hide_env_values = true)]
    pub hub_token: Option<String>,

    /// Hub API server the agent connects to
    #[arg(long)]
    pub hub_server_internal: Option<String>,

    /// Hub API server advertised to the hub; the internal one when omitted
    #[arg(long)]
    pub hub_server_external: Option<String>,

    /// Values file with `managedCluster.name` and `hub.*`
    #[arg(long)]
    pub values: Option<PathBuf>,

    /// Write the values template here and exit
    #[arg(long)]
    pub out_templates_dir: Option<PathBuf>,

    /// Render the bootstrap manifests without applying them
    #[arg(long)]
    pub dry_run: bool,

    /// Write rendered manifests here on a dry run
    #[arg(long, requires = "dry_run")]
    pub output_file: Option<PathBuf>,

    #[command(flatten)]
    pub cluster: ClusterFlags,
}

impl JoinHubArgs {
    fn flags(&self) -> JoinFlags<'_> {
        JoinFlags {
            cluster_name: self.name.as_deref(),
            hub_token: self.hub_token.as_deref(),
            hub_server_internal: self.hub_server_internal.as_deref(),
            hub_server_external: self.hub_server_external.as_deref(),
        }
    }
}

/// Run the join command.
pub async fn run(args: JoinArgs) -> Result<()> {
    let JoinTarget::Hub(hub) = args.target;

    if let Some(dir) = &hub.out_templates_dir {
        for path in scenario::assets().extract_to(scenario::JOIN, dir)? {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let values = load_values(hub.values.as_deref())?;
    let resolved = JoinValues::resolve(&hub.flags(), values.as_ref())?;
    let applier: Box<dyn Applier> = if hub.dry_run {
        match &hub.output_file {
            Some(path) => Box::new(DryRunApplier::with_output_file(path)),
            None => Box::new(DryRunApplier::new()),
        }
    } else {
        Box::new(KubeApplier::new(hub.cluster.client().await?))
    };

    let report = join_hub(applier.as_ref(), &scenario::renderer(), &resolved).await?;

    match (&report.rendered, &hub.output_file) {
        (Some(rendered), None) => print!("{rendered}"),
        (Some(_), Some(_)) => {}
        (None, _) => {
            for record in &report.records {
                println!("{} {}", record.resource, record.outcome);
            }
            println!(
                "{} joining {}; accept it on the hub with `cm accept clusters --clusters {}`",
                resolved.cluster_name, resolved.hub_server_external, resolved.cluster_name
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_needs_no_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("join.yaml");
        let hub = JoinHubArgs {
            name: Some("foo".to_string()),
            hub_token: Some("abc.def".to_string()),
            hub_server_internal: Some("https://api.hub.example.com:6443".to_string()),
            hub_server_external: None,
            values: None,
            out_templates_dir: None,
            dry_run: true,
            output_file: Some(out.clone()),
            cluster: ClusterFlags {
                kubeconfig: Some(dir.path().join("missing-kubeconfig")),
                context: None,
            },
        };

        run(JoinArgs { target: JoinTarget::Hub(hub) }).await.unwrap();

        let rendered = std::fs::read_to_string(&out).unwrap();
        assert!(rendered.contains("kind: Klusterlet"));
        assert!(rendered.contains("clusterName: foo"));
    }
}
