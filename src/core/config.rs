//! Configuration parsing and validation.
//!
//! Basalt configuration is loaded from TOML files with CLI overrides. Every
//! section has defaults, so an empty file yields a runnable single-replica
//! node listening on the standard port.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level Basalt configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Shared endpoint configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Connection classification limits.
    #[serde(default)]
    pub multiplexer: MultiplexerConfig,

    /// Replica set and log compaction.
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Filesystem paths.
    #[serde(default)]
    pub paths: PathConfig,

    /// Telemetry and observability configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Shared endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the multiplexed RPC/HTTP endpoint.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Deadline applied to every proposal and read issued by a translator.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Request deadline as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Connection multiplexer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiplexerConfig {
    /// Upper bound on bytes buffered while classifying a connection.
    #[serde(default = "default_max_lookahead_bytes")]
    pub max_lookahead_bytes: usize,

    /// Time allowed for a connection to produce classifiable bytes.
    #[serde(default = "default_classify_timeout_ms")]
    pub classify_timeout_ms: u64,

    /// Capacity of each protocol's hand-off queue.
    #[serde(default = "default_handoff_backlog")]
    pub handoff_backlog: usize,

    /// Maximum concurrent connections on the shared endpoint.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            max_lookahead_bytes: default_max_lookahead_bytes(),
            classify_timeout_ms: default_classify_timeout_ms(),
            handoff_backlog: default_handoff_backlog(),
            max_connections: default_max_connections(),
        }
    }
}

/// Replica set configuration for the in-process consensus gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Identifier of the replica that serves this node's translators.
    #[serde(default = "default_node_id")]
    pub node_id: u64,

    /// Number of replicas in the group.
    #[serde(default = "default_replicas")]
    pub replicas: u64,

    /// Applied entries between leader snapshots.
    #[serde(default = "default_snapshot_entries")]
    pub snapshot_entries: u64,

    /// Entries kept behind the snapshot index when the log is compacted.
    #[serde(default = "default_compaction_overhead")]
    pub compaction_overhead: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            replicas: default_replicas(),
            snapshot_entries: default_snapshot_entries(),
            compaction_overhead: default_compaction_overhead(),
        }
    }
}

/// Filesystem path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Directory for persisted snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl PathConfig {
    /// Snapshot file location for one replica.
    pub fn snapshot_path(&self, node_id: u64) -> PathBuf {
        Path::new(&self.data_dir)
            .join(format!("node-{}", node_id))
            .join("snapshot.bin")
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_bind() -> String {
    "0.0.0.0:18419".to_string()
}

fn default_request_timeout_ms() -> u64 {
    3_000
}

fn default_max_lookahead_bytes() -> usize {
    8 * 1024
}

fn default_classify_timeout_ms() -> u64 {
    5_000
}

fn default_handoff_backlog() -> usize {
    1024
}

fn default_max_connections() -> usize {
    10_000
}

fn default_node_id() -> u64 {
    1
}

fn default_replicas() -> u64 {
    1
}

fn default_snapshot_entries() -> u64 {
    10_000
}

fn default_compaction_overhead() -> u64 {
    500
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref bind) = overrides.bind {
            self.server.bind = bind.clone();
        }
        if let Some(ref data_dir) = overrides.data_dir {
            self.paths.data_dir = data_dir.clone();
        }
        if let Some(node_id) = overrides.node_id {
            self.replication.node_id = node_id;
        }
        if let Some(replicas) = overrides.replicas {
            self.replication.replicas = replicas;
        }
    }

    /// Parsed bind address of the shared endpoint.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("invalid server.bind address: {}", self.server.bind))
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_server()?;
        self.validate_multiplexer()?;
        self.validate_replication()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<()> {
        self.bind_addr()?;
        if self.server.request_timeout_ms == 0 {
            anyhow::bail!("server.request_timeout_ms must be > 0");
        }
        Ok(())
    }

    fn validate_multiplexer(&self) -> Result<()> {
        // Large enough to hold a frame header or a short request line.
        if self.multiplexer.max_lookahead_bytes < 16 {
            anyhow::bail!(
                "multiplexer.max_lookahead_bytes must be >= 16, got: {}",
                self.multiplexer.max_lookahead_bytes
            );
        }
        if self.multiplexer.classify_timeout_ms == 0 {
            anyhow::bail!("multiplexer.classify_timeout_ms must be > 0");
        }
        if self.multiplexer.handoff_backlog == 0 {
            anyhow::bail!("multiplexer.handoff_backlog must be > 0");
        }
        if self.multiplexer.max_connections == 0 {
            anyhow::bail!("multiplexer.max_connections must be > 0");
        }
        Ok(())
    }

    fn validate_replication(&self) -> Result<()> {
        let r = &self.replication;
        if r.replicas == 0 {
            anyhow::bail!("replication.replicas must be > 0");
        }
        if r.node_id == 0 || r.node_id > r.replicas {
            anyhow::bail!(
                "replication.node_id must be in 1..={}, got: {}",
                r.replicas,
                r.node_id
            );
        }
        if r.snapshot_entries == 0 {
            anyhow::bail!("replication.snapshot_entries must be > 0");
        }
        if r.compaction_overhead >= r.snapshot_entries {
            anyhow::bail!(
                "replication.compaction_overhead ({}) must be less than snapshot_entries ({})",
                r.compaction_overhead,
                r.snapshot_entries
            );
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override bind address.
    pub bind: Option<String>,
    /// Override data directory.
    pub data_dir: Option<String>,
    /// Override serving replica.
    pub node_id: Option<u64>,
    /// Override replica count.
    pub replicas: Option<u64>,
}
