//! Consensus gateway contract.
//!
//! Translators never touch a state machine directly. They hand encoded
//! commands to a [`ConsensusGateway`], which orders writes into one log,
//! applies them on every replica, and serves linearizable reads.
//!
//! Guarantees an implementation must provide:
//! - Total order: every replica applies the same write sequence, each entry
//!   at most once, strictly in log order, never concurrently with another
//!   apply, query, snapshot, or restore on that replica.
//! - `propose` returns only after a majority recorded the command and the
//!   serving replica applied it.
//! - `read` reflects every write acknowledged before the read began.
//! - A deadline that expires never leaves a proposal half-applied.
//! - Lagging replicas are caught up through snapshot and restore.
//!
//! Retried proposals are not deduplicated. Every write kind is idempotent,
//! so re-application is harmless.

use super::command::{Command, QueryResult};
use crate::core::error::BasaltResult;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by gateway calls.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = BasaltResult<T>> + Send + 'a>>;

/// Ordered commit and linearizable read across a replica group.
pub trait ConsensusGateway: Send + Sync {
    /// Commit an encoded write command.
    ///
    /// Fails with `Timeout`, `NotLeader`, or `ClusterUnavailable`, or with
    /// the state machine's rejection when the command is malformed.
    fn propose(&self, command: Vec<u8>, deadline: Duration) -> GatewayFuture<'_, ()>;

    /// Serve an encoded read command.
    ///
    /// Fails with `Timeout` or `ClusterUnavailable`, or with the state
    /// machine's rejection when the command is malformed.
    fn read(&self, query: Vec<u8>, deadline: Duration) -> GatewayFuture<'_, QueryResult>;
}

/// Encode `command` and propose it.
pub async fn propose_command(
    gateway: &dyn ConsensusGateway,
    command: &Command,
    deadline: Duration,
) -> BasaltResult<()> {
    let bytes = command.encode()?;
    gateway.propose(bytes, deadline).await
}

/// Encode `command` and read it.
pub async fn read_command(
    gateway: &dyn ConsensusGateway,
    command: &Command,
    deadline: Duration,
) -> BasaltResult<QueryResult> {
    let bytes = command.encode()?;
    gateway.read(bytes, deadline).await
}
