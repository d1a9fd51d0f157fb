//! Command-line interface.
//!
//! Unified CLI for Basalt operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// Basalt - replicated named-bitmap store.
#[derive(Parser, Debug)]
#[command(name = "basalt")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the Basalt server.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Snapshot operations.
    Snapshot(commands::SnapshotArgs),
    /// Issue one RPC call against a running server.
    Client(commands::ClientArgs),
}
