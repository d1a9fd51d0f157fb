//! Start command implementation.

use super::config::load_config;
use crate::core::config::ConfigOverrides;
use crate::core::runtime::Runtime;
use anyhow::Result;
use clap::Args;
use std::path::Path;

/// Start the Basalt server.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Override the shared endpoint bind address.
    #[arg(long)]
    pub bind: Option<String>,

    /// Override the data directory.
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Override the replica this endpoint serves from.
    #[arg(long)]
    pub node_id: Option<u64>,

    /// Override the replica count.
    #[arg(long)]
    pub replicas: Option<u64>,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` takes precedence over the configured level.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Run the start command.
pub async fn run_start(
    config_path: Option<&Path>,
    log_level: Option<String>,
    args: StartArgs,
) -> Result<()> {
    let overrides = ConfigOverrides {
        log_level,
        bind: args.bind,
        data_dir: args.data_dir,
        node_id: args.node_id,
        replicas: args.replicas,
    };
    let config = load_config(config_path, &overrides)?;

    init_tracing(&config.telemetry.log_level);

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
