//! CLI command implementations.

mod client;
mod config;
mod snapshot;
mod start;

pub use client::{run_client, ClientArgs};
pub use config::{load_config, run_config, ConfigArgs, DEFAULT_CONFIG_PATH};
pub use snapshot::{run_snapshot, SnapshotArgs};
pub use start::{run_start, StartArgs};
