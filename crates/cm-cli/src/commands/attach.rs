//! `cm attach clusterclaim` - resume a claimed cluster and save a context for it.
//!
//! # Usage
//!
//! ```bash
//! # Attach on the current cluster pool host and switch to the new context
//! cm attach clusterclaim my-claim --current
//!
//! # Preview the service account bundle without touching any cluster
//! cm attach clusterclaim my-claim --dry-run --service-account me
//! ```

use clap::{Args, Subcommand};
use cm_applier::KubeTargetConnector;
use cm_clusterpool::{render_credentials, AttachOptions, ContextStore, Federation};
use tokio_util::sync::CancellationToken;

use super::pool_client;
use crate::Result;

/// Attach a claimed cluster
#[derive(Args, Debug)]
pub struct AttachArgs {
    #[command(subcommand)]
    pub target: AttachTarget,
}

#[derive(Subcommand, Debug)]
pub enum AttachTarget {
    /// Attach a cluster claim
    Clusterclaim(ClusterClaimArgs),
}

#[derive(Args, Debug)]
pub struct ClusterClaimArgs {
    /// Name of the cluster claim
    pub name: String,

    /// Cluster pool host; the current one when omitted
    #[arg(long)]
    pub cph: Option<String>,

    /// Minutes to wait for the claimed cluster to run
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Make the new context current
    #[arg(long)]
    pub current: bool,

    /// Render the service account bundle only
    #[arg(long)]
    pub dry_run: bool,

    /// Write rendered manifests here on a dry run
    #[arg(long, requires = "dry_run")]
    pub output_file: Option<std::path::PathBuf>,

    /// Service account to create; derived from the pool identity when omitted
    #[arg(long)]
    pub service_account: Option<String>,
}

impl ClusterClaimArgs {
    fn options(&self) -> AttachOptions {
        let mut opts = AttachOptions::new(&self.name).with_timeout_minutes(self.timeout);
        opts.set_current = self.current;
        opts.dry_run = self.dry_run;
        opts.output_file = self.output_file.clone();
        opts.service_account = self.service_account.clone();
        opts
    }
}

/// Run the attach command.
pub async fn run(args: AttachArgs, cancel: &CancellationToken) -> Result<()> {
    let AttachTarget::Clusterclaim(claim) = args.target;
    let opts = claim.options();

    // Dry runs need neither a context store nor a pool client.
    if opts.dry_run {
        let outcome = render_credentials(&opts).await?;
        if let (Some(rendered), None) = (&outcome.report.rendered, &opts.output_file) {
            print!("{rendered}");
        }
        return Ok(());
    }

    let store = ContextStore::from_env()?;
    let (host, pool) = pool_client(claim.cph.as_deref()).await?;
    let outcome = Federation::new(&host, pool, &KubeTargetConnector, &store)
        .attach(&opts, cancel)
        .await?;

    if let Some(entry) = &outcome.context {
        println!(
            "Context '{}' saved to {}{}",
            entry.name,
            store.path().display(),
            if opts.set_current { " and set as current" } else { "" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dry_run_args(output_file: std::path::PathBuf) -> AttachArgs {
        AttachArgs {
            target: AttachTarget::Clusterclaim(ClusterClaimArgs {
                name: "dev-1".to_string(),
                cph: Some("not-registered".to_string()),
                timeout: 10,
                current: true,
                dry_run: true,
                output_file: Some(output_file),
                service_account: Some("me".to_string()),
            }),
        }
    }

    #[tokio::test]
    async fn dry_run_exits_before_host_lookup() {
        // An unregistered --cph would fail the pool client lookup.
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("attach.yaml");

        run(dry_run_args(out.clone()), &CancellationToken::new())
            .await
            .unwrap();

        let rendered = std::fs::read_to_string(&out).unwrap();
        assert!(rendered.contains("kind: ServiceAccount"));
        assert!(rendered.contains("name: me"));
    }
}
