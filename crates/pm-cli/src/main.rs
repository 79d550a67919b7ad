//! pm - verified package installation CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pm_cli::cmd;
use pm_cli::{Cli, Commands, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; RUST_LOG=pm_core=debug shows per-stage detail.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(&cli);

    match cli.command {
        Commands::Install { packages, fetch } => {
            cmd::install::install(&config, &packages, &fetch).await
        }
        Commands::Verify { archives } => cmd::verify::verify(&config, &archives),
        Commands::List { available } => cmd::list::list(&config, available),
        Commands::Recover => cmd::recover::recover(&config),
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(())
        }
    }
}
