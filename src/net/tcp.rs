//! Shared-endpoint socket.
//!
//! Raw TCP connections are accepted here before the multiplexer looks at
//! them. Every accepted [`TcpConnection`] holds one permit of the endpoint's
//! connection budget and gives it back on drop, whichever protocol server it
//! ends up with.

use crate::core::error::{BasaltError, BasaltResult};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

/// Socket settings for the shared endpoint.
#[derive(Debug, Clone)]
pub struct TcpListenerConfig {
    pub bind_addr: SocketAddr,
    /// Connections held open at once, classified or not.
    pub max_connections: usize,
    pub nodelay: bool,
}

impl Default for TcpListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 18419)),
            max_connections: 10_000,
            nodelay: true,
        }
    }
}

/// Per-endpoint connection identifier, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Endpoint counters.
#[derive(Debug, Default)]
pub struct TcpListenerMetrics {
    pub accepted: AtomicU64,
    /// Closed on arrival because the budget was spent.
    pub refused: AtomicU64,
}

/// One accepted socket and its share of the connection budget.
pub struct TcpConnection {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    stream: TcpStream,
    _permit: OwnedSemaphorePermit,
}

impl TcpConnection {
    /// Underlying socket.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for TcpConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpConnection {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// Bound socket with a connection budget.
pub struct TcpListener {
    socket: TokioTcpListener,
    local_addr: SocketAddr,
    nodelay: bool,
    budget: Arc<Semaphore>,
    max_connections: usize,
    next_id: u64,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<TcpListenerMetrics>,
}

impl TcpListener {
    /// Bind the configured address.
    pub async fn bind(config: TcpListenerConfig, shutdown_rx: watch::Receiver<bool>) -> BasaltResult<Self> {
        let socket = TokioTcpListener::bind(config.bind_addr).await.map_err(|e| {
            BasaltError::internal(format!("failed to bind to {}: {}", config.bind_addr, e))
        })?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| BasaltError::internal(format!("local_addr: {}", e)))?;
        let max_connections = config.max_connections.max(1);

        Ok(Self {
            socket,
            local_addr,
            nodelay: config.nodelay,
            budget: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            next_id: 1,
            shutdown_rx,
            metrics: Arc::new(TcpListenerMetrics::default()),
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> &Arc<TcpListenerMetrics> {
        &self.metrics
    }

    /// Connections currently holding a permit.
    pub fn open_connections(&self) -> usize {
        self.max_connections - self.budget.available_permits()
    }

    /// Next connection within budget, or `Ok(None)` once shutdown is signalled.
    ///
    /// A connection arriving with the budget spent is closed at once.
    pub async fn accept(&mut self) -> BasaltResult<Option<TcpConnection>> {
        loop {
            if *self.shutdown_rx.borrow() {
                return Ok(None);
            }

            let (stream, remote_addr) = tokio::select! {
                accepted = self.socket.accept() => accepted
                    .map_err(|e| BasaltError::internal(format!("accept failed: {}", e)))?,
                _ = self.shutdown_rx.changed() => return Ok(None),
            };

            let Ok(permit) = Arc::clone(&self.budget).try_acquire_owned() else {
                self.metrics.refused.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(remote = %remote_addr, limit = self.max_connections, "connection limit reached, closing");
                continue;
            };

            if self.nodelay {
                let _ = stream.set_nodelay(true);
            }
            let id = ConnectionId(self.next_id);
            self.next_id += 1;
            self.metrics.accepted.fetch_add(1, Ordering::Relaxed);

            return Ok(Some(TcpConnection {
                id,
                remote_addr,
                stream,
                _permit: permit,
            }));
        }
    }
}

impl fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpListener")
            .field("local_addr", &self.local_addr)
            .field("open", &self.open_connections())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}
