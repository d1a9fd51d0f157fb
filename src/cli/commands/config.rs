//! Config command implementation.

use crate::core::config::{Config, ConfigOverrides};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Config file read when `--config` is not given, if it exists.
pub const DEFAULT_CONFIG_PATH: &str = "config/basalt.toml";

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate,
    /// Print configuration with defaults.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Load the configuration the CLI would run with.
///
/// An explicit path must exist. Without one, the default path is used when
/// present and built-in defaults otherwise. Overrides are applied last and
/// the result is validated.
pub fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                Config::from_file(&default_path)?
            } else {
                Config::default()
            }
        }
    };
    config.apply_overrides(overrides);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Run the config command.
pub fn run_config(config_path: Option<&Path>, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => validate_config(config_path),
        ConfigCommand::Show { format } => show_config(config_path, &format),
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path, &ConfigOverrides::default())?;
    println!("✓ Configuration is valid");
    println!("  bind:      {}", config.server.bind);
    println!(
        "  replicas:  {} (serving from {})",
        config.replication.replicas, config.replication.node_id
    );
    println!(
        "  snapshot:  {}",
        config
            .paths
            .snapshot_path(config.replication.node_id)
            .display()
    );
    Ok(())
}

fn show_config(path: Option<&Path>, format: &str) -> Result<()> {
    let config = load_config(path, &ConfigOverrides::default())?;
    println!("{}", render_config(&config, format)?);
    Ok(())
}

fn render_config(config: &Config, format: &str) -> Result<String> {
    match format {
        "json" => serde_json::to_string_pretty(config).context("failed to render json"),
        "toml" => toml::to_string_pretty(config).context("failed to render toml"),
        other => anyhow::bail!("unknown format: {} (expected toml or json)", other),
    }
}
