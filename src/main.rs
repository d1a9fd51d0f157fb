//! Basalt - unified CLI entrypoint.
//!
//! Usage:
//!   basalt start --config config/basalt.toml
//!   basalt config validate --config config/basalt.toml
//!   basalt snapshot inspect data/node-1/snapshot.bin
//!   basalt client --addr 127.0.0.1:18419 AddMany '{"name":"a","values":[1,2]}'

use anyhow::Result;
use basalt::cli::commands::{run_client, run_config, run_snapshot, run_start};
use basalt::cli::{Cli, Commands};
use clap::Parser;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.map(PathBuf::from);

    match cli.command {
        Commands::Start(args) => run_start(config_path.as_deref(), cli.log_level, args).await,
        Commands::Config(args) => run_config(config_path.as_deref(), args),
        Commands::Snapshot(args) => run_snapshot(args),
        Commands::Client(args) => run_client(args).await,
    }
}
