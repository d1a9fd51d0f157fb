//! Connection multiplexer.
//!
//! One listening socket serves several protocols. Every accepted
//! connection gets its own task, which reads a bounded prefix and asks the
//! registered matchers, in registration order, whether they recognise it:
//!
//! ```text
//!   accept ──► spawn ──► read prefix ──► matcher[0] ──NoMatch──► matcher[1] ──NoMatch──► close
//!                           ▲                │                      │
//!                           └──── NeedMore ──┴──────────────────────┘
//!                                            │ Match
//!                                            ▼
//!                        RewindStream(prefix, conn) ──► protocol queue ──► MuxListener
//! ```
//!
//! A matcher that answers `NeedMore` blocks lower-priority matchers from
//! winning until it decides. Connections that match nothing, exceed the
//! lookahead budget, time out, or disconnect early are closed and only
//! counted in [`MuxMetrics`]; nothing propagates to other connections.

use super::rewind::RewindStream;
use super::tcp::{TcpConnection, TcpListener, TcpListenerConfig};
use crate::core::config::MultiplexerConfig;
use crate::core::error::BasaltResult;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};

/// A classified connection as seen by a protocol server.
pub type MuxedStream = RewindStream<TcpConnection>;

/// Verdict of one matcher on the bytes read so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The connection belongs to this protocol.
    Match,
    /// The connection cannot belong to this protocol.
    NoMatch,
    /// More bytes are needed to decide.
    NeedMore,
}

/// Recognises a protocol from a connection's leading bytes.
pub trait ProtocolMatcher: Send + Sync {
    /// Protocol name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Inspect the bytes read so far.
    fn probe(&self, prefix: &[u8]) -> MatchOutcome;
}

/// Matches when the first byte equals a fixed magic value.
#[derive(Debug, Clone)]
pub struct MagicByteMatcher {
    name: &'static str,
    magic: u8,
}

impl MagicByteMatcher {
    pub fn new(name: &'static str, magic: u8) -> Self {
        Self { name, magic }
    }
}

impl ProtocolMatcher for MagicByteMatcher {
    fn name(&self) -> &'static str {
        self.name
    }

    fn probe(&self, prefix: &[u8]) -> MatchOutcome {
        match prefix.first() {
            None => MatchOutcome::NeedMore,
            Some(b) if *b == self.magic => MatchOutcome::Match,
            Some(_) => MatchOutcome::NoMatch,
        }
    }
}

/// Matches an HTTP/1.x request line: method SP target SP version.
#[derive(Debug, Clone, Default)]
pub struct Http1Matcher;

impl ProtocolMatcher for Http1Matcher {
    fn name(&self) -> &'static str {
        "http"
    }

    fn probe(&self, prefix: &[u8]) -> MatchOutcome {
        let Some(first) = prefix.first() else {
            return MatchOutcome::NeedMore;
        };
        if !is_tchar(*first) {
            return MatchOutcome::NoMatch;
        }
        let Some(eol) = prefix.iter().position(|b| *b == b'\n') else {
            if prefix.iter().any(|b| b.is_ascii_control() && *b != b'\r') {
                return MatchOutcome::NoMatch;
            }
            return MatchOutcome::NeedMore;
        };

        let line = prefix[..eol].strip_suffix(b"\r").unwrap_or(&prefix[..eol]);
        let mut head = Vec::with_capacity(line.len() + 4);
        head.extend_from_slice(line);
        head.extend_from_slice(b"\r\n\r\n");

        let mut headers = [httparse::EMPTY_HEADER; 0];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&head) {
            Ok(httparse::Status::Complete(_)) => MatchOutcome::Match,
            _ => MatchOutcome::NoMatch,
        }
    }
}

/// RFC 7230 token character, the alphabet of request methods.
fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Multiplexer limits.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Upper bound on bytes read before a decision.
    pub max_lookahead_bytes: usize,
    /// Time allowed to reach a decision.
    pub classify_timeout: Duration,
    /// Capacity of each protocol queue.
    pub handoff_backlog: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self::from(&MultiplexerConfig::default())
    }
}

impl From<&MultiplexerConfig> for MuxConfig {
    fn from(config: &MultiplexerConfig) -> Self {
        Self {
            max_lookahead_bytes: config.max_lookahead_bytes,
            classify_timeout: Duration::from_millis(config.classify_timeout_ms),
            handoff_backlog: config.handoff_backlog,
        }
    }
}

/// Classification counters.
#[derive(Debug, Default)]
pub struct MuxMetrics {
    classified: Mutex<BTreeMap<&'static str, u64>>,
    /// Every matcher said NoMatch, or the lookahead budget ran out.
    pub unmatched: AtomicU64,
    /// No decision within the classify timeout.
    pub timeouts: AtomicU64,
    /// Peer closed or errored before a decision.
    pub disconnects: AtomicU64,
    /// The chosen protocol server was no longer accepting.
    pub handoff_failures: AtomicU64,
}

impl MuxMetrics {
    fn record_classified(&self, protocol: &'static str) {
        *self.classified.lock().entry(protocol).or_default() += 1;
    }

    /// Connections handed to `protocol`.
    pub fn classified(&self, protocol: &str) -> u64 {
        self.classified.lock().get(protocol).copied().unwrap_or(0)
    }

    /// Connections closed without a hand-off.
    pub fn dropped(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
            + self.timeouts.load(Ordering::Relaxed)
            + self.disconnects.load(Ordering::Relaxed)
            + self.handoff_failures.load(Ordering::Relaxed)
    }
}

/// Accept side of one protocol's queue.
///
/// Protocol servers accept from this exactly as they would from a socket.
#[derive(Debug)]
pub struct MuxListener {
    protocol: &'static str,
    rx: mpsc::Receiver<MuxedStream>,
    local_addr: SocketAddr,
}

impl MuxListener {
    /// Protocol this listener receives.
    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// Next classified connection, or `None` once the multiplexer stopped.
    pub async fn accept(&mut self) -> Option<MuxedStream> {
        self.rx.recv().await
    }

    /// Address of the shared socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl axum::serve::Listener for MuxListener {
    type Io = MuxedStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.rx.recv().await {
            Some(stream) => {
                let addr = stream.get_ref().remote_addr;
                (stream, addr)
            }
            // The multiplexer has stopped; the server's shutdown signal ends it.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

struct Route {
    matcher: Box<dyn ProtocolMatcher>,
    tx: mpsc::Sender<MuxedStream>,
}

enum Decision {
    Matched(usize),
    NoMatch,
    NeedMore,
}

fn decide(routes: &[Route], prefix: &[u8]) -> Decision {
    for (i, route) in routes.iter().enumerate() {
        match route.matcher.probe(prefix) {
            MatchOutcome::Match => return Decision::Matched(i),
            MatchOutcome::NeedMore => return Decision::NeedMore,
            MatchOutcome::NoMatch => continue,
        }
    }
    Decision::NoMatch
}

enum Sniffed {
    Matched(usize),
    Unmatched,
    Disconnected,
}

/// Shared-socket classifier and dispatcher.
pub struct Multiplexer {
    config: MuxConfig,
    listener: TcpListener,
    routes: Vec<Route>,
    metrics: Arc<MuxMetrics>,
}

impl Multiplexer {
    /// Bind the shared socket.
    pub async fn bind(
        config: MuxConfig,
        tcp: TcpListenerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> BasaltResult<Self> {
        let listener = TcpListener::bind(tcp, shutdown_rx).await?;
        Ok(Self {
            config,
            listener,
            routes: Vec::new(),
            metrics: Arc::new(MuxMetrics::default()),
        })
    }

    /// Address of the shared socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Classification counters.
    pub fn metrics(&self) -> Arc<MuxMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Register a protocol. Earlier registrations take priority.
    pub fn register(&mut self, matcher: impl ProtocolMatcher + 'static) -> MuxListener {
        let (tx, rx) = mpsc::channel(self.config.handoff_backlog.max(1));
        let protocol = matcher.name();
        self.routes.push(Route {
            matcher: Box::new(matcher),
            tx,
        });
        MuxListener {
            protocol,
            rx,
            local_addr: self.listener.local_addr(),
        }
    }

    /// Accept and classify until shutdown.
    pub async fn run(self) -> BasaltResult<()> {
        let Multiplexer {
            config,
            mut listener,
            routes,
            metrics,
        } = self;
        let local_addr = listener.local_addr();
        let routes: Arc<[Route]> = routes.into();
        let config = Arc::new(config);

        tracing::info!(addr = %local_addr, protocols = routes.len(), "multiplexer listening");

        loop {
            let conn = match listener.accept().await {
                Ok(Some(conn)) => conn,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept error");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };
            tokio::spawn(classify(
                conn,
                Arc::clone(&routes),
                Arc::clone(&config),
                Arc::clone(&metrics),
            ));
        }

        tracing::info!(addr = %local_addr, "multiplexer stopped");
        Ok(())
    }
}

async fn classify(
    mut conn: TcpConnection,
    routes: Arc<[Route]>,
    config: Arc<MuxConfig>,
    metrics: Arc<MuxMetrics>,
) {
    let id = conn.id;
    let mut prefix = Vec::new();
    let sniffed = tokio::time::timeout(
        config.classify_timeout,
        sniff(&mut conn, &mut prefix, &routes, config.max_lookahead_bytes),
    )
    .await;

    match sniffed {
        Ok(Sniffed::Matched(i)) => {
            let route = &routes[i];
            let protocol = route.matcher.name();
            let stream = RewindStream::new(Bytes::from(prefix), conn);
            if route.tx.send(stream).await.is_err() {
                metrics.handoff_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(conn = %id, protocol, "protocol server gone, closing");
                return;
            }
            metrics.record_classified(protocol);
            tracing::trace!(conn = %id, protocol, "connection classified");
        }
        Ok(Sniffed::Unmatched) => {
            metrics.unmatched.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(conn = %id, bytes = prefix.len(), "unrecognised protocol, closing");
        }
        Ok(Sniffed::Disconnected) => {
            metrics.disconnects.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(conn = %id, bytes = prefix.len(), "peer left before classification");
        }
        Err(_) => {
            metrics.timeouts.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(conn = %id, "classification timed out, closing");
        }
    }
}

async fn sniff(
    conn: &mut TcpConnection,
    prefix: &mut Vec<u8>,
    routes: &[Route],
    max_lookahead: usize,
) -> Sniffed {
    let mut chunk = [0u8; 512];
    loop {
        match decide(routes, &prefix[..]) {
            Decision::Matched(i) => return Sniffed::Matched(i),
            Decision::NoMatch => return Sniffed::Unmatched,
            Decision::NeedMore if prefix.len() >= max_lookahead => return Sniffed::Unmatched,
            Decision::NeedMore => {}
        }

        let want = (max_lookahead - prefix.len()).min(chunk.len());
        match conn.read(&mut chunk[..want]).await {
            Ok(0) | Err(_) => return Sniffed::Disconnected,
            Ok(n) => prefix.extend_from_slice(&chunk[..n]),
        }
    }
}
