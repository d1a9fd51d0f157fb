//! In-process consensus gateway.
//!
//! [`LocalCluster`] hosts every replica of a group inside one process. It is
//! an ordering and delivery harness, not a consensus algorithm: there is no
//! election and no network replication. What it does provide is the
//! contract the state machine relies on:
//!
//! ```text
//!            propose(bytes)                      read(bytes)
//!                  │                                  │
//!                  ▼                                  ▼
//!   ┌──────────────────────────────── cluster lock (bounded by deadline) ──┐
//!   │  leader.apply ──ok──► log.push ──► follower.apply (each online)      │
//!   │        │                              │                              │
//!   │      reject                      every N entries:                    │
//!   │   (never logged)                 snapshot index + compact log        │
//!   │                                                                      │
//!   │  set_online(r) ──► replay log, or ship snapshot if r is too far back │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All work for one proposal happens inside one critical section. The
//! deadline only bounds lock acquisition, so an expired caller can never
//! leave a command applied on some replicas but not others.

use super::command::QueryResult;
use super::gateway::{ConsensusGateway, GatewayFuture};
use super::state_machine::{BitmapStateMachine, ReplicatedStateMachine};
use crate::bitmap::Bitmaps;
use crate::core::config::ReplicationConfig;
use crate::core::error::{BasaltError, BasaltResult};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Replica group settings.
#[derive(Debug, Clone)]
pub struct LocalClusterConfig {
    /// Number of replicas (ids `1..=replicas`).
    pub replicas: u64,
    /// Applied entries between compactions.
    pub snapshot_entries: u64,
    /// Entries retained behind the snapshot index.
    pub compaction_overhead: u64,
}

impl Default for LocalClusterConfig {
    fn default() -> Self {
        Self::from(&ReplicationConfig::default())
    }
}

impl From<&ReplicationConfig> for LocalClusterConfig {
    fn from(config: &ReplicationConfig) -> Self {
        Self {
            replicas: config.replicas,
            snapshot_entries: config.snapshot_entries,
            compaction_overhead: config.compaction_overhead,
        }
    }
}

/// One committed log entry.
#[derive(Debug, Clone)]
struct LogEntry {
    index: u64,
    command: Vec<u8>,
}

/// One replica and its apply position.
#[derive(Debug)]
struct Replica {
    id: u64,
    online: bool,
    applied_index: u64,
    state_machine: BitmapStateMachine,
}

impl Replica {
    fn new(id: u64, bitmaps: Bitmaps, applied_index: u64) -> Self {
        Self {
            id,
            online: true,
            applied_index,
            state_machine: BitmapStateMachine::new(bitmaps),
        }
    }

    fn apply(&mut self, entry: &LogEntry) -> BasaltResult<()> {
        debug_assert!(
            entry.index == self.applied_index + 1,
            "apply out of order on replica {}: {} after {}",
            self.id,
            entry.index,
            self.applied_index
        );
        self.state_machine.apply(&entry.command)?;
        self.applied_index = entry.index;
        Ok(())
    }
}

/// Counters for one cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterStats {
    /// Entries committed to the log.
    pub committed: u64,
    /// Proposals rejected by the leader's state machine.
    pub rejected: u64,
    /// Reads served.
    pub reads: u64,
    /// Log compactions performed.
    pub compactions: u64,
    /// Snapshots shipped to lagging replicas.
    pub snapshot_transfers: u64,
}

/// Per-replica view for operators and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaStatus {
    pub id: u64,
    pub online: bool,
    pub applied_index: u64,
    pub digest: u64,
}

#[derive(Debug)]
struct ClusterState {
    replicas: Vec<Replica>,
    leader: u64,
    log: VecDeque<LogEntry>,
    /// Index of the most recent committed entry.
    last_index: u64,
    /// Index covered by the most recent compaction snapshot.
    snapshot_index: u64,
    stats: ClusterStats,
}

impl ClusterState {
    /// Index of the oldest entry still in the log.
    fn first_index(&self) -> u64 {
        self.log
            .front()
            .map_or(self.last_index + 1, |entry| entry.index)
    }

    fn online_count(&self) -> usize {
        self.replicas.iter().filter(|r| r.online).count()
    }

    fn require_majority(&self) -> BasaltResult<()> {
        let online = self.online_count();
        let total = self.replicas.len();
        if online * 2 <= total {
            return Err(BasaltError::ClusterUnavailable { online, total });
        }
        Ok(())
    }

    fn replica(&self, id: u64) -> BasaltResult<&Replica> {
        self.replicas
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| BasaltError::internal(format!("unknown replica {}", id)))
    }

    fn replica_mut(&mut self, id: u64) -> BasaltResult<&mut Replica> {
        self.replicas
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| BasaltError::internal(format!("unknown replica {}", id)))
    }

    fn commit(&mut self, via: u64, command: Vec<u8>, config: &LocalClusterConfig) -> BasaltResult<()> {
        if via != self.leader {
            return Err(BasaltError::NotLeader {
                replica: via,
                leader: self.leader,
            });
        }
        self.require_majority()?;

        let entry = LogEntry {
            index: self.last_index + 1,
            command,
        };

        // The leader applies first; a rejected command never enters the log.
        let leader = self.leader;
        if !self.replica(leader)?.online {
            let (online, total) = (self.online_count(), self.replicas.len());
            return Err(BasaltError::ClusterUnavailable { online, total });
        }
        if let Err(e) = self.replica_mut(leader)?.apply(&entry) {
            self.stats.rejected += 1;
            return Err(e);
        }

        for follower in self
            .replicas
            .iter_mut()
            .filter(|r| r.online && r.id != leader)
        {
            if let Err(e) = follower.apply(&entry) {
                tracing::error!(
                    replica = follower.id,
                    index = entry.index,
                    error = %e,
                    "follower diverged from leader on apply"
                );
                follower.online = false;
            }
        }

        tracing::trace!(index = entry.index, "entry committed");
        self.last_index = entry.index;
        self.log.push_back(entry);
        self.stats.committed += 1;
        self.maybe_compact(config);
        Ok(())
    }

    fn maybe_compact(&mut self, config: &LocalClusterConfig) {
        if self.last_index - self.snapshot_index < config.snapshot_entries {
            return;
        }
        self.snapshot_index = self.last_index;
        let keep_from = self
            .snapshot_index
            .saturating_sub(config.compaction_overhead)
            + 1;
        let before = self.log.len();
        while self.log.front().is_some_and(|e| e.index < keep_from) {
            self.log.pop_front();
        }
        self.stats.compactions += 1;
        tracing::debug!(
            snapshot_index = self.snapshot_index,
            removed = before - self.log.len(),
            first_index = self.first_index(),
            "log compacted"
        );
    }

    /// Bring a replica up to `last_index`, shipping a snapshot when the
    /// entries it needs have been compacted away.
    fn catch_up(&mut self, id: u64) -> BasaltResult<()> {
        let first_index = self.first_index();
        let last_index = self.last_index;
        let applied = self.replica(id)?.applied_index;

        if applied + 1 < first_index {
            let source = self
                .replicas
                .iter()
                .filter(|r| r.online && r.id != id && r.applied_index == last_index)
                .map(|r| r.id)
                .next()
                .ok_or_else(|| {
                    BasaltError::internal(format!("no current replica to ship snapshot to {}", id))
                })?;
            let image = self.replica(source)?.state_machine.snapshot_bytes()?;
            let target = self.replica_mut(id)?;
            target.state_machine.restore(&mut image.as_slice())?;
            target.applied_index = last_index;
            self.stats.snapshot_transfers += 1;
            tracing::info!(
                replica = id,
                source,
                index = last_index,
                bytes = image.len(),
                "snapshot shipped to lagging replica"
            );
            return Ok(());
        }

        let pending: Vec<LogEntry> = self
            .log
            .iter()
            .filter(|e| e.index > applied)
            .cloned()
            .collect();
        let target = self.replica_mut(id)?;
        for entry in &pending {
            target.apply(entry)?;
        }
        tracing::debug!(replica = id, replayed = pending.len(), "replica caught up from log");
        Ok(())
    }
}

/// In-process replica group.
#[derive(Debug)]
pub struct LocalCluster {
    config: LocalClusterConfig,
    state: Mutex<ClusterState>,
}

impl LocalCluster {
    /// Create a group of empty replicas. Replica 1 leads.
    pub fn new(config: LocalClusterConfig) -> Self {
        Self::from_image(config, Bitmaps::new(), 0)
    }

    /// Create a group whose replicas all start from `bitmaps` at `index`.
    pub fn from_image(config: LocalClusterConfig, bitmaps: Bitmaps, index: u64) -> Self {
        let replicas = (1..=config.replicas.max(1))
            .map(|id| Replica::new(id, bitmaps.clone(), index))
            .collect();
        Self {
            config,
            state: Mutex::new(ClusterState {
                replicas,
                leader: 1,
                log: VecDeque::new(),
                last_index: index,
                snapshot_index: index,
                stats: ClusterStats::default(),
            }),
        }
    }

    /// Gateway bound to one replica.
    pub fn handle(self: &Arc<Self>, replica: u64) -> LocalGateway {
        LocalGateway {
            cluster: Arc::clone(self),
            replica,
        }
    }

    /// Current leader id.
    pub async fn leader(&self) -> u64 {
        self.state.lock().await.leader
    }

    /// Move leadership to another replica.
    pub async fn set_leader(&self, id: u64) -> BasaltResult<()> {
        let mut state = self.state.lock().await;
        state.replica(id)?;
        state.leader = id;
        tracing::info!(leader = id, "leadership moved");
        Ok(())
    }

    /// Take a replica offline or bring it back. A returning replica is
    /// caught up before this call returns.
    pub async fn set_online(&self, id: u64, online: bool) -> BasaltResult<()> {
        let mut state = self.state.lock().await;
        let was_online = state.replica(id)?.online;
        if online && !was_online {
            state.replica_mut(id)?.online = true;
            if let Err(e) = state.catch_up(id) {
                state.replica_mut(id)?.online = false;
                return Err(e);
            }
        } else if !online {
            state.replica_mut(id)?.online = false;
        }
        tracing::info!(replica = id, online, "replica availability changed");
        Ok(())
    }

    /// Status of every replica.
    pub async fn status(&self) -> BasaltResult<Vec<ReplicaStatus>> {
        let state = self.state.lock().await;
        state
            .replicas
            .iter()
            .map(|r| {
                Ok(ReplicaStatus {
                    id: r.id,
                    online: r.online,
                    applied_index: r.applied_index,
                    digest: r.state_machine.digest()?,
                })
            })
            .collect()
    }

    /// State digest of every online replica, by id.
    pub async fn digests(&self) -> BasaltResult<Vec<(u64, u64)>> {
        let state = self.state.lock().await;
        state
            .replicas
            .iter()
            .filter(|r| r.online)
            .map(|r| Ok((r.id, r.state_machine.digest()?)))
            .collect()
    }

    /// Oldest and newest indexes still held in the log.
    pub async fn log_bounds(&self) -> (u64, u64) {
        let state = self.state.lock().await;
        (state.first_index(), state.last_index)
    }

    /// Counters.
    pub async fn stats(&self) -> ClusterStats {
        self.state.lock().await.stats
    }

    /// Snapshot image of one replica with the index it covers.
    pub async fn snapshot(&self, id: u64) -> BasaltResult<(u64, Vec<u8>)> {
        let state = self.state.lock().await;
        let replica = state.replica(id)?;
        Ok((replica.applied_index, replica.state_machine.snapshot_bytes()?))
    }

    async fn lock_within(&self, deadline: Duration) -> BasaltResult<MutexGuard<'_, ClusterState>> {
        tokio::time::timeout(deadline, self.state.lock())
            .await
            .map_err(|_| BasaltError::Timeout {
                elapsed_ms: deadline.as_millis() as u64,
            })
    }

    async fn propose_via(&self, via: u64, command: Vec<u8>, deadline: Duration) -> BasaltResult<()> {
        let mut state = self.lock_within(deadline).await?;
        state.commit(via, command, &self.config)
    }

    async fn read_via(&self, via: u64, query: Vec<u8>, deadline: Duration) -> BasaltResult<QueryResult> {
        let mut state = self.lock_within(deadline).await?;
        state.require_majority()?;
        let replica = state.replica(via)?;
        if !replica.online {
            let (online, total) = (state.online_count(), state.replicas.len());
            return Err(BasaltError::ClusterUnavailable { online, total });
        }
        let result = replica.state_machine.query(&query)?;
        state.stats.reads += 1;
        Ok(result)
    }

    #[cfg(test)]
    async fn hold_lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().await
    }
}

/// Gateway handle bound to one replica of a [`LocalCluster`].
#[derive(Debug, Clone)]
pub struct LocalGateway {
    cluster: Arc<LocalCluster>,
    replica: u64,
}

impl LocalGateway {
    /// Replica this handle serves from.
    pub fn replica(&self) -> u64 {
        self.replica
    }

    /// The cluster behind this handle.
    pub fn cluster(&self) -> &Arc<LocalCluster> {
        &self.cluster
    }
}

impl ConsensusGateway for LocalGateway {
    fn propose(&self, command: Vec<u8>, deadline: Duration) -> GatewayFuture<'_, ()> {
        Box::pin(self.cluster.propose_via(self.replica, command, deadline))
    }

    fn read(&self, query: Vec<u8>, deadline: Duration) -> GatewayFuture<'_, QueryResult> {
        Box::pin(self.cluster.read_via(self.replica, query, deadline))
    }
}
