//! Main entry point for the demo-search CLI.

use anyhow::Result;
use clap::Parser;
use demo_search::{cli, experiment, settings::Settings, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = cli::Cli::parse();

    // Load settings
    let settings = Settings::load(args.config.as_deref())?;

    // Initialize logging
    telemetry::init(&settings.logging)?;

    // Execute the requested command
    match args.command {
        cli::Commands::Search(search) => experiment::search(search, &settings).await,
        cli::Commands::Probe(probe) => experiment::probe(probe, &settings).await,
    }
}
