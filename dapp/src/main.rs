//! Dapp - cached, stage-by-stage container image builds
//!
//! Subcommands:
//! - `build`: rebuild from the first changed stage onward
//! - `plan`: show which stages are clean and which would run
//! - `stages`: print the stage chain

use clap::Parser;
use commands::{Cli, Commands};
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "dapp=debug,convenient_stages=debug,convenient_git=debug"
    } else {
        "dapp=info,convenient_stages=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let result = match cli.command {
        Commands::Build {
            config,
            revision,
            docker,
            json,
        } => commands::build::execute(&config, revision, &docker, json).await,
        Commands::Plan {
            config,
            revision,
            docker,
            json,
        } => commands::plan::execute(&config, revision, &docker, json).await,
        Commands::Stages => commands::stages::execute(),
    };

    if let Err(e) = result {
        eprintln!("❌ {}", e);
        process::exit(1);
    }
}
