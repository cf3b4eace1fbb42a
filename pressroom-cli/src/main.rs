//! pressroom: rebuild static sites and publish them to their hosts.
//!
//! # Usage
//!
//! ```text
//! pressroom init
//! pressroom status [--json]
//! pressroom publish <site> [--no-cache]
//! pressroom cancel <site>
//! pressroom deploy <site> [--draft] [--dry-run]
//! pressroom daemon start|stop|status
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    cancel::CancelArgs, daemon::DaemonCommand, deploy::DeployArgs, init::InitArgs,
    publish::PublishArgs, status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "pressroom",
    version,
    about = "Rebuild static sites and publish them over SFTP or to S3",
    long_about = None,
)]
struct Cli {
    /// Site config to read instead of ~/.pressroom/config.yaml.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter site config.
    Init(InitArgs),

    /// Show configured sites, running builds and last publish times.
    Status(StatusArgs),

    /// Ask the daemon to rebuild and redeploy a site.
    Publish(PublishArgs),

    /// Ask the daemon to cancel a site's running build.
    Cancel(CancelArgs),

    /// Deploy a site's existing build output without rebuilding.
    Deploy(DeployArgs),

    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // The foreground daemon installs its own subscriber.
    if !matches!(cli.command, Commands::Daemon { .. }) {
        init_tracing();
    }
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Init(args) => args.run(config),
        Commands::Status(args) => args.run(config),
        Commands::Publish(args) => args.run(),
        Commands::Cancel(args) => args.run(),
        Commands::Deploy(args) => args.run(config),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

/// Warnings and errors from the library crates go to stderr so that
/// `--json` output on stdout stays parseable. `RUST_LOG` overrides.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
