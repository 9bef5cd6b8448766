//! ralph - CLI entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ralph::cli::{Cli, Commands};
use ralph::config::Config;
use ralph::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "ralph=debug" } else { "ralph=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("RALPH_LOG")
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Run(args) => {
            let cwd = std::env::current_dir()?;

            // ConfigInvalid is fatal here, with every issue listed.
            let config = match &args.config {
                Some(path) => Config::load(path),
                None => Config::discover(&cwd),
            };
            let config = match config {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            };

            let options = match args.into_options(config, cwd) {
                Ok(options) => options,
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            };

            let code = Orchestrator::new(options).run().await;
            std::process::exit(code);
        }
    }
}
