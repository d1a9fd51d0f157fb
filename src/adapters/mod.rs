//! Protocol adapters.
//!
//! Adapters translate client protocols into [`Command`]s and drive them
//! through the consensus gateway. Both adapters share one listening
//! endpoint; the multiplexer decides which adapter owns each connection.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                 Shared endpoint (multiplexer)                 │
//! ├──────────────────────────────┬────────────────────────────────┤
//! │  Binary RPC (magic 0x08)     │  HTTP/1.x                      │
//! │                              │                                │
//! │  - framed JSON calls         │  - one route per operation     │
//! │  - typed replies             │  - SUCCESS / OPERATION ERROR / │
//! │  - error frames              │    INVALID DATA bodies         │
//! └──────────────────────────────┴────────────────────────────────┘
//!                                │
//!                           Translator
//!                                │
//!                     ConsensusGateway propose/read
//! ```
//!
//! - [`rpc`] - binary RPC server, codec and client
//! - [`http`] - HTTP router

use crate::core::error::BasaltResult;
use crate::replica::{propose_command, read_command, Command, ConsensusGateway, OpClass, QueryResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub mod http;
pub mod rpc;

/// Result of decoding a frame from the wire.
#[derive(Debug)]
pub enum DecodeResult<T> {
    /// A complete frame was decoded.
    Complete(T),
    /// More data is needed to complete the frame.
    Incomplete,
    /// The input is invalid.
    Invalid(String),
}

/// Adapter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Adapter is created but not started.
    Created,
    /// Adapter is running and accepting connections.
    Running,
    /// Adapter has stopped.
    Stopped,
}

/// Outcome of one translated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A write committed.
    Done,
    /// A read answered.
    Result(QueryResult),
}

/// Request counters shared by a translator's callers.
#[derive(Debug, Default)]
pub struct TranslatorMetrics {
    /// Commands submitted.
    pub total_requests: AtomicU64,
    /// Commands that failed for any reason.
    pub failed_requests: AtomicU64,
}

/// Shared core of every adapter: submit a command with a deadline.
pub struct Translator {
    gateway: Arc<dyn ConsensusGateway>,
    request_timeout: Duration,
    metrics: TranslatorMetrics,
}

impl Translator {
    /// Create a translator over `gateway`.
    pub fn new(gateway: Arc<dyn ConsensusGateway>, request_timeout: Duration) -> Self {
        Self {
            gateway,
            request_timeout,
            metrics: TranslatorMetrics::default(),
        }
    }

    /// Deadline applied to every call.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Counters.
    pub fn metrics(&self) -> &TranslatorMetrics {
        &self.metrics
    }

    /// Propose a write or issue a read, depending on the command's class.
    pub async fn execute(&self, command: &Command) -> BasaltResult<Reply> {
        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        let gateway = self.gateway.as_ref();
        let result = match command.class() {
            OpClass::Write => propose_command(gateway, command, self.request_timeout)
                .await
                .map(|()| Reply::Done),
            OpClass::Read => read_command(gateway, command, self.request_timeout)
                .await
                .map(Reply::Result),
        };
        if let Err(ref e) = result {
            self.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(kind = %command.kind(), error = %e, "command failed");
        }
        result
    }
}

impl std::fmt::Debug for Translator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translator")
            .field("request_timeout", &self.request_timeout)
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl Reply {
    /// Resolve as a query result.
    pub fn into_result(self) -> BasaltResult<QueryResult> {
        match self {
            Reply::Result(r) => Ok(r),
            Reply::Done => Err(crate::core::error::BasaltError::internal(
                "write acknowledged where a read result was expected",
            )),
        }
    }
}
