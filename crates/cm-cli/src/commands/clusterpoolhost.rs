//! `cm create clusterpoolhost` and `cm use clusterpoolhost`.
//!
//! # Usage
//!
//! ```bash
//! # Register a host reached through the kubeconfig context "pools"
//! cm create clusterpoolhost dev --api-server https://api.pools.example.com:6443 \
//!     --namespace pools --group devs --context pools --current
//!
//! # List hosts, then switch
//! cm use clusterpoolhost
//! cm use clusterpoolhost dev
//! ```

use clap::{Args, Subcommand};
use cm_clusterpool::ClusterPoolHost;

use super::load_hosts;
use crate::{Error, Result};

/// Register a resource
#[derive(Args, Debug)]
pub struct CreateArgs {
    #[command(subcommand)]
    pub target: CreateTarget,
}

#[derive(Subcommand, Debug)]
pub enum CreateTarget {
    /// Register a cluster pool host
    Clusterpoolhost(CreateHostArgs),
}

#[derive(Args, Debug)]
pub struct CreateHostArgs {
    /// Registry name of the host
    pub name: String,

    /// API server URL
    #[arg(long)]
    pub api_server: String,

    /// Namespace holding the pools and claims
    #[arg(long)]
    pub namespace: String,

    /// Group granted access to claims
    #[arg(long, default_value = "")]
    pub group: String,

    /// Web console URL
    #[arg(long, default_value = "")]
    pub console: String,

    /// Kubeconfig context reaching the host; the host name when omitted
    #[arg(long)]
    pub context: Option<String>,

    /// Make this the current host
    #[arg(long)]
    pub current: bool,
}

/// Switch the current resource
#[derive(Args, Debug)]
pub struct UseArgs {
    #[command(subcommand)]
    pub target: UseTarget,
}

#[derive(Subcommand, Debug)]
pub enum UseTarget {
    /// Switch the current cluster pool host (omit the name to list hosts)
    Clusterpoolhost(UseHostArgs),
}

#[derive(Args, Debug)]
pub struct UseHostArgs {
    /// Host to switch to
    pub name: Option<String>,
}

/// Run the create command.
pub fn create(args: CreateArgs) -> Result<()> {
    let CreateTarget::Clusterpoolhost(host) = args.target;
    if host.api_server.is_empty() || host.namespace.is_empty() {
        return Err(Error::validation("--api-server and --namespace must not be empty"));
    }

    let (path, mut hosts) = load_hosts()?;
    let first = hosts.hosts.is_empty();
    let name = host.name.clone();
    hosts.upsert(ClusterPoolHost {
        name: host.name,
        api_server: host.api_server,
        console: host.console,
        namespace: host.namespace,
        group: host.group,
        context: host.context,
    });
    if host.current || first {
        hosts.set_current(&name)?;
    }
    hosts.save(&path)?;

    println!("Cluster pool host '{name}' saved to {}", path.display());
    Ok(())
}

/// Run the use command.
pub fn use_host(args: UseArgs) -> Result<()> {
    let UseTarget::Clusterpoolhost(target) = args.target;
    let (path, mut hosts) = load_hosts()?;
    if hosts.hosts.is_empty() {
        return Err(Error::command_failed(
            "no cluster pool hosts registered. Run `cm create clusterpoolhost` first.",
        ));
    }

    match target.name {
        None => {
            println!("Cluster pool hosts:");
            for (name, host) in &hosts.hosts {
                let marker = if hosts.current.as_deref() == Some(name.as_str()) {
                    " *"
                } else {
                    ""
                };
                println!("  {name} ({}){marker}", host.api_server);
            }
        }
        Some(name) => {
            hosts.set_current(&name)?;
            hosts.save(&path)?;
            println!("Switched to cluster pool host '{name}'");
        }
    }
    Ok(())
}
