//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: storage → replication → adapters → listeners
//! - Shutdown order: listeners → adapters → replication → storage
//!
//! Storage restores the persisted snapshot on start and writes a fresh one
//! after everything else has stopped.

use crate::adapters::http::HttpServer;
use crate::adapters::rpc::{RpcServer, RPC_MAGIC};
use crate::adapters::Translator;
use crate::core::config::Config;
use crate::core::error::BasaltResult;
use crate::net::{
    Http1Matcher, MagicByteMatcher, Multiplexer, MuxConfig, MuxMetrics, TcpListenerConfig,
};
use crate::replica::{LocalCluster, LocalClusterConfig};
use crate::storage::SnapshotFile;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle phase of one runtime component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Not yet initialized.
    Starting,
    /// Serving.
    Healthy,
    /// Initialization or shutdown failed.
    Failed,
    /// Shutdown in progress.
    Stopping,
    /// Shut down cleanly.
    Stopped,
}

/// Phase of every component, in start order.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Snapshot storage health.
    pub storage: ComponentHealth,
    /// Replica group health.
    pub replication: ComponentHealth,
    /// Protocol server health.
    pub adapters: ComponentHealth,
    /// Shared listener health.
    pub listeners: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            storage: ComponentHealth::Starting,
            replication: ComponentHealth::Starting,
            adapters: ComponentHealth::Starting,
            listeners: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Every component is serving.
    pub fn is_ready(&self) -> bool {
        [self.storage, self.replication, self.adapters, self.listeners]
            .iter()
            .all(|h| *h == ComponentHealth::Healthy)
    }

    /// No component has failed.
    pub fn is_alive(&self) -> bool {
        ![self.storage, self.replication, self.adapters, self.listeners]
            .contains(&ComponentHealth::Failed)
    }
}

/// Basalt runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Snapshot file for this node.
    snapshot_path: PathBuf,

    /// Snapshot loaded at start, consumed by replication.
    restored: Option<SnapshotFile>,

    /// Component phases.
    health: RuntimeHealth,

    /// Set between a successful start and stop.
    running: Arc<AtomicBool>,

    /// Broadcasts `true` once to every spawned task.
    shutdown_tx: watch::Sender<bool>,

    shutdown_rx: watch::Receiver<bool>,

    cluster: Option<Arc<LocalCluster>>,
    translator: Option<Arc<Translator>>,
    rpc: Option<Arc<RpcServer>>,
    http: Option<Arc<HttpServer>>,
    local_addr: Option<SocketAddr>,
    mux_metrics: Option<Arc<MuxMetrics>>,

    mux_handle: Option<JoinHandle<BasaltResult<()>>>,
    rpc_handle: Option<JoinHandle<BasaltResult<()>>>,
    http_handle: Option<JoinHandle<BasaltResult<()>>>,
}

impl Runtime {
    /// Validate `config` and prepare an unstarted runtime.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let snapshot_path = config.paths.snapshot_path(config.replication.node_id);

        Ok(Self {
            config: Arc::new(config),
            snapshot_path,
            restored: None,
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            cluster: None,
            translator: None,
            rpc: None,
            http: None,
            local_addr: None,
            mux_metrics: None,
            mux_handle: None,
            rpc_handle: None,
            http_handle: None,
        })
    }

    /// Effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Path the snapshot is restored from and persisted to.
    pub fn snapshot_path(&self) -> &PathBuf {
        &self.snapshot_path
    }

    /// Component phases.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// See [`RuntimeHealth::is_ready`].
    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// See [`RuntimeHealth::is_alive`].
    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    /// Started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Receiver that flips to `true` when shutdown begins.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Address of the shared endpoint once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Replica group once started.
    pub fn cluster(&self) -> Option<&Arc<LocalCluster>> {
        self.cluster.as_ref()
    }

    /// Shared translator once started.
    pub fn translator(&self) -> Option<&Arc<Translator>> {
        self.translator.as_ref()
    }

    /// Multiplexer counters once listening.
    pub fn mux_metrics(&self) -> Option<&Arc<MuxMetrics>> {
        self.mux_metrics.as_ref()
    }

    /// Bring the node up.
    ///
    /// Components are started in order:
    /// 1. Storage (snapshot restore)
    /// 2. Replica group
    /// 3. Protocol servers
    /// 4. Shared listener
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            node_id = self.config.replication.node_id,
            replicas = self.config.replication.replicas,
            bind = %self.config.server.bind,
            "starting Basalt runtime"
        );

        self.init_storage().await?;
        self.init_replication().await?;
        self.init_adapters().await?;
        self.start_listeners().await?;

        self.running.store(true, Ordering::Release);
        tracing::info!("Basalt runtime started");

        Ok(())
    }

    /// Load the persisted snapshot, if any.
    async fn init_storage(&mut self) -> Result<()> {
        tracing::debug!(path = %self.snapshot_path.display(), "initializing storage");

        match SnapshotFile::load_if_present(&self.snapshot_path) {
            Ok(restored) => {
                if let Some(ref snapshot) = restored {
                    tracing::info!(
                        index = snapshot.meta.index,
                        digest = %format!("{:016x}", snapshot.meta.digest),
                        bytes = snapshot.meta.size_bytes,
                        "snapshot loaded"
                    );
                }
                self.restored = restored;
            }
            Err(e) => {
                self.health.storage = ComponentHealth::Failed;
                return Err(e).context("failed to load persisted snapshot");
            }
        }

        self.health.storage = ComponentHealth::Healthy;
        Ok(())
    }

    /// Build the replica group from the restored snapshot.
    async fn init_replication(&mut self) -> Result<()> {
        tracing::debug!("initializing replica group");

        let config = LocalClusterConfig::from(&self.config.replication);
        let cluster = match self.restored.take() {
            Some(snapshot) => {
                let bitmaps = snapshot.bitmaps()?;
                LocalCluster::from_image(config, bitmaps, snapshot.meta.index)
            }
            None => LocalCluster::new(config),
        };

        // The fronted replica leads so that writes from either protocol commit.
        let node_id = self.config.replication.node_id;
        if let Err(e) = cluster.set_leader(node_id).await {
            self.health.replication = ComponentHealth::Failed;
            return Err(e).context("failed to elect the local replica");
        }

        self.cluster = Some(Arc::new(cluster));
        self.health.replication = ComponentHealth::Healthy;

        tracing::info!(
            replicas = self.config.replication.replicas,
            leader = node_id,
            "replica group initialized"
        );
        Ok(())
    }

    /// Create the translator and protocol servers.
    async fn init_adapters(&mut self) -> Result<()> {
        tracing::debug!("initializing protocol adapters");

        let cluster = self
            .cluster
            .as_ref()
            .context("replica group not initialized")?;
        let gateway = cluster.handle(self.config.replication.node_id);
        let translator = Arc::new(Translator::new(
            Arc::new(gateway),
            self.config.server.request_timeout(),
        ));

        self.rpc = Some(Arc::new(RpcServer::new(Arc::clone(&translator))));
        self.http = Some(Arc::new(HttpServer::new(Arc::clone(&translator))));
        self.translator = Some(translator);
        self.health.adapters = ComponentHealth::Healthy;

        tracing::info!(
            timeout_ms = self.config.server.request_timeout_ms,
            "protocol adapters initialized"
        );
        Ok(())
    }

    /// Bind the shared endpoint and spawn the multiplexer and servers.
    async fn start_listeners(&mut self) -> Result<()> {
        tracing::debug!("starting shared listener");

        let tcp = TcpListenerConfig {
            bind_addr: self.config.bind_addr()?,
            max_connections: self.config.multiplexer.max_connections,
            nodelay: true,
        };
        let mut mux = Multiplexer::bind(
            MuxConfig::from(&self.config.multiplexer),
            tcp,
            self.shutdown_rx.clone(),
        )
        .await
        .context("failed to bind shared listener")?;

        // Registration order is match priority.
        let rpc_listener = mux.register(MagicByteMatcher::new("rpc", RPC_MAGIC));
        let http_listener = mux.register(Http1Matcher);

        let rpc = self.rpc.clone().context("rpc server not initialized")?;
        let http = self.http.clone().context("http server not initialized")?;

        self.rpc_handle = Some(tokio::spawn(rpc.serve(rpc_listener, self.shutdown_rx.clone())));
        self.http_handle = Some(tokio::spawn(
            http.serve(http_listener, self.shutdown_rx.clone()),
        ));

        let addr = mux.local_addr();
        self.local_addr = Some(addr);
        self.mux_metrics = Some(mux.metrics());
        self.mux_handle = Some(tokio::spawn(mux.run()));

        self.health.listeners = ComponentHealth::Healthy;
        tracing::info!(addr = %addr, "shared listener started");
        Ok(())
    }

    /// Ask every task to wind down. [`Runtime::stop`] still has to run.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait_for_shutdown(&mut self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Serve until SIGINT or a shutdown request, then stop.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await?;
        Ok(())
    }

    /// Take the node down and persist its replica.
    ///
    /// Components are stopped in reverse order:
    /// 1. Shared listener
    /// 2. Protocol servers
    /// 3. Replica group
    /// 4. Storage (snapshot persisted)
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping Basalt runtime");
        self.running.store(false, Ordering::Release);

        let _ = self.shutdown_tx.send(true);

        self.stop_listeners().await;
        self.stop_adapters().await;
        self.stop_replication().await;
        self.stop_storage().await?;

        tracing::info!("Basalt runtime stopped");
        Ok(())
    }

    async fn stop_listeners(&mut self) {
        tracing::debug!("stopping shared listener");
        self.health.listeners = ComponentHealth::Stopping;
        await_task("multiplexer", self.mux_handle.take()).await;
        self.health.listeners = ComponentHealth::Stopped;
    }

    async fn stop_adapters(&mut self) {
        tracing::debug!("stopping protocol adapters");
        self.health.adapters = ComponentHealth::Stopping;
        await_task("rpc server", self.rpc_handle.take()).await;
        await_task("http server", self.http_handle.take()).await;
        self.health.adapters = ComponentHealth::Stopped;
    }

    async fn stop_replication(&mut self) {
        tracing::debug!("stopping replica group");
        self.health.replication = ComponentHealth::Stopping;
        if let Some(ref cluster) = self.cluster {
            let stats = cluster.stats().await;
            tracing::info!(
                committed = stats.committed,
                rejected = stats.rejected,
                reads = stats.reads,
                compactions = stats.compactions,
                "replica group stopped"
            );
        }
        self.health.replication = ComponentHealth::Stopped;
    }

    /// Persist this node's replica.
    async fn stop_storage(&mut self) -> Result<()> {
        tracing::debug!("stopping storage");
        self.health.storage = ComponentHealth::Stopping;

        if let Some(cluster) = self.cluster.take() {
            let (index, image) = cluster
                .snapshot(self.config.replication.node_id)
                .await
                .context("failed to take snapshot")?;
            let snapshot = SnapshotFile::new(index, image);
            if let Err(e) = snapshot.write_to_file(&self.snapshot_path) {
                self.health.storage = ComponentHealth::Failed;
                return Err(e);
            }
            tracing::info!(
                path = %self.snapshot_path.display(),
                index,
                bytes = snapshot.meta.size_bytes,
                "snapshot persisted"
            );
        }

        self.health.storage = ComponentHealth::Stopped;
        Ok(())
    }
}

/// Wait for a spawned component to finish, logging how it ended.
async fn await_task(name: &'static str, handle: Option<JoinHandle<BasaltResult<()>>>) {
    let Some(handle) = handle else {
        return;
    };
    match tokio::time::timeout(STOP_TIMEOUT, handle).await {
        Ok(Ok(Ok(()))) => {
            tracing::info!(component = name, "stopped");
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!(component = name, error = %e, "stopped with error");
        }
        Ok(Err(e)) => {
            tracing::warn!(component = name, error = %e, "task panicked");
        }
        Err(_) => {
            tracing::warn!(component = name, "stop timed out");
        }
    }
}
