//! cm CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// cm - cluster pool and managed cluster operations
#[derive(Parser, Debug)]
#[command(name = "cm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Attach a claimed cluster: resume it and save a context for it
    Attach(commands::attach::AttachArgs),
    /// Hibernate claimed clusters
    Hibernate(commands::power::PowerArgs),
    /// Resume claimed clusters
    Resume(commands::power::PowerArgs),
    /// Scale a cluster's workers
    Scale(commands::scale::ScaleArgs),
    /// Accept clusters joining the hub
    Accept(commands::accept::AcceptArgs),
    /// Join a cluster to a hub
    Join(commands::join::JoinArgs),
    /// Detach a managed cluster from its hub
    Detach(commands::detach::DetachArgs),
    /// Register a cluster pool host
    Create(commands::clusterpoolhost::CreateArgs),
    /// Switch the current cluster pool host
    Use(commands::clusterpoolhost::UseArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self, cancel: &CancellationToken) -> Result<()> {
        match self.command {
            Commands::Attach(args) => commands::attach::run(args, cancel).await,
            Commands::Hibernate(args) => {
                commands::power::run(args, cm_clusterpool::power::PowerState::Hibernating).await
            }
            Commands::Resume(args) => {
                commands::power::run(args, cm_clusterpool::power::PowerState::Running).await
            }
            Commands::Scale(args) => commands::scale::run(args).await,
            Commands::Accept(args) => commands::accept::run(args).await,
            Commands::Join(args) => commands::join::run(args).await,
            Commands::Detach(args) => commands::detach::run(args).await,
            Commands::Create(args) => commands::clusterpoolhost::create(args),
            Commands::Use(args) => commands::clusterpoolhost::use_host(args),
        }
    }
}
