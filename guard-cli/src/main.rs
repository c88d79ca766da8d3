mod args;
mod commands;
mod fixtures;

use anyhow::Result;
use clap::Parser;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    guard_common::init(cli.json_logs);
    let config = guard_common::config::load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Run(args) => commands::run_batch(args, &cli.fixtures, &config).await,
        Commands::Monitor(args) => commands::monitor_batch(args, &cli.fixtures, &config).await,
        Commands::Rollback(args) => commands::rollback_cluster(args, &cli.fixtures).await,
        Commands::List(args) => commands::list_clusters(args, &cli.fixtures).await,
        Commands::Validate(args) => commands::validate_config(args).await,
    }
}
