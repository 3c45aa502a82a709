//! `cm hibernate clusterclaim` and `cm resume clusterclaim`.
//!
//! # Usage
//!
//! ```bash
//! # Hibernate two claims on the current cluster pool host
//! cm hibernate clusterclaim dev-1,dev-2
//!
//! # Show what resuming would apply
//! cm resume clusterclaim dev-1 --dry-run
//! ```

use std::path::PathBuf;

use clap::{Args, Subcommand};
use cm_applier::{Applier, DryRunApplier, KubeApplier};
use cm_clusterpool::power::{parse_claim_list, set_power_state, PowerState};
use cm_clusterpool::scenario;

use super::pool_client;
use crate::{Error, Result};

/// Change the power state of claimed clusters
#[derive(Args, Debug)]
pub struct PowerArgs {
    #[command(subcommand)]
    pub target: PowerTarget,
}

#[derive(Subcommand, Debug)]
pub enum PowerTarget {
    /// Cluster claims, comma separated
    Clusterclaim(PowerClaimArgs),
}

#[derive(Args, Debug)]
pub struct PowerClaimArgs {
    /// Comma separated cluster claim names
    pub names: String,

    /// Cluster pool host; the current one when omitted
    #[arg(long)]
    pub cph: Option<String>,

    /// Render the power-state documents without applying them
    #[arg(long)]
    pub dry_run: bool,

    /// Write rendered manifests here on a dry run
    #[arg(long, requires = "dry_run")]
    pub output_file: Option<PathBuf>,
}

/// Run hibernate or resume.
pub async fn run(args: PowerArgs, state: PowerState) -> Result<()> {
    let PowerTarget::Clusterclaim(claim) = args.target;
    let claims = parse_claim_list(&claim.names);
    if claims.is_empty() {
        return Err(Error::validation("clusterclaim name is missing"));
    }

    let (host, pool) = pool_client(claim.cph.as_deref()).await?;
    let applier: Box<dyn Applier> = if claim.dry_run {
        match &claim.output_file {
            Some(path) => Box::new(DryRunApplier::with_output_file(path)),
            None => Box::new(DryRunApplier::new()),
        }
    } else {
        Box::new(KubeApplier::new(pool.clone()))
    };

    let report = set_power_state(
        pool.as_ref(),
        applier.as_ref(),
        &scenario::renderer(),
        &host,
        &claims,
        state,
    )
    .await?;

    match (&report.rendered, &claim.output_file) {
        (Some(rendered), None) => print!("{rendered}"),
        (Some(_), Some(_)) => {}
        (None, _) => {
            for record in &report.records {
                println!("{} {} ({state})", record.resource, record.outcome);
            }
        }
    }
    Ok(())
}
