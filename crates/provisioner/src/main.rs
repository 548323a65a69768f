//! Host provisioner CLI.
//!
//! Provisions a fresh Debian/Ubuntu or RHEL-family host for the
//! application: installs Docker, hardens SSH, clones the repository,
//! exports backups over NFS, starts the compose stack and bootstraps
//! MySQL replication.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]
// Allow async functions that don't use await (may need await in future)
#![allow(clippy::unused_async)]
// Allow imports after statements in functions
#![allow(clippy::items_after_statements)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use provision_cli::commands::run::RunCommand;
use provision_cli::commands::ssh::SshCommand;
use provision_cli::ui;

/// Idempotent host provisioner.
#[derive(Parser)]
#[command(
    name = "provision",
    version,
    about = "Idempotent host provisioner",
    long_about = "Provision this host for the application.\n\n\
                  Installs packages and Docker, hardens SSH, clones the repository,\n\
                  exports backups over NFS, starts the containers and bootstraps\n\
                  MySQL replication.\n\n\
                  All steps are idempotent - re-running converges to the same state\n\
                  and reuses answers saved in ~/.provision.conf."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision this host.
    ///
    /// Resolves configuration, detects the OS and runs every stage in order.
    Run(RunCommand),

    /// Manage SSH daemon settings after provisioning.
    Ssh(SshCommand),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("info,provision_cli=debug,provision=debug")
    } else {
        EnvFilter::new("warn,provision_cli=info,provision=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Run(cmd) => cmd.run().await,
        Commands::Ssh(cmd) => cmd.run().await,
    };

    if let Err(e) = result {
        ui::print_fatal(&format!("{e:#}"));
        std::process::exit(1);
    }
    Ok(())
}
