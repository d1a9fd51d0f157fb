//! Bitmap state machine.
//!
//! The state machine owns one [`Bitmaps`] value and is driven exclusively by
//! the consensus gateway. It applies committed write commands, answers read
//! commands, and produces or consumes snapshot images.
//!
//! Apply is deterministic: the result depends only on the command bytes and
//! the current collection state. Every command is decoded and validated
//! before the collection is touched, and every mutation is a single
//! infallible collection call, so a rejected command leaves no trace.

use super::command::{Command, OpClass, QueryResult};
use crate::bitmap::Bitmaps;
use crate::core::error::{BasaltError, BasaltResult};
use std::hash::Hasher;
use std::io::{Read, Write};
use twox_hash::XxHash64;

/// Contract between the consensus gateway and a replicated state machine.
///
/// The gateway serializes every call on one replica: no two of these run
/// concurrently, and `apply` sees committed entries in log order.
pub trait ReplicatedStateMachine: Send {
    /// Apply one committed write command.
    fn apply(&mut self, command: &[u8]) -> BasaltResult<()>;

    /// Answer one read command against the current state.
    fn query(&self, query: &[u8]) -> BasaltResult<QueryResult>;

    /// Write the full state to `sink`.
    fn snapshot(&self, sink: &mut dyn Write) -> BasaltResult<()>;

    /// Replace the full state from `source`.
    fn restore(&mut self, source: &mut dyn Read) -> BasaltResult<()>;

    /// Checksum over the snapshot bytes.
    fn digest(&self) -> BasaltResult<u64>;
}

/// State machine over a named bitmap collection.
#[derive(Debug, Default)]
pub struct BitmapStateMachine {
    bitmaps: Bitmaps,
    stats: StateMachineStats,
}

/// Counters for one state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateMachineStats {
    /// Write commands applied.
    pub applied: u64,
    /// Write commands rejected without effect.
    pub rejected: u64,
    /// Successful restores.
    pub restores: u64,
}

impl BitmapStateMachine {
    /// Create a state machine that owns `bitmaps`.
    pub fn new(bitmaps: Bitmaps) -> Self {
        Self {
            bitmaps,
            stats: StateMachineStats::default(),
        }
    }

    /// Read-only view of the collection.
    pub fn bitmaps(&self) -> &Bitmaps {
        &self.bitmaps
    }

    /// Counters.
    pub fn stats(&self) -> StateMachineStats {
        self.stats
    }

    /// Snapshot bytes as a vector.
    pub fn snapshot_bytes(&self) -> BasaltResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.snapshot(&mut buf)?;
        Ok(buf)
    }

    fn decode_read(bytes: &[u8]) -> BasaltResult<Command> {
        let command = Command::decode(bytes)?;
        if command.class() != OpClass::Read {
            return Err(BasaltError::unsupported(format!(
                "{} is a write and cannot be queried",
                command.kind()
            )));
        }
        Ok(command)
    }

    fn dispatch_write(&mut self, command: Command) -> BasaltResult<()> {
        let b = &mut self.bitmaps;
        match command {
            Command::Add { name, value } => b.add(&name, value),
            Command::AddMany { name, values } => b.add_many(&name, &values),
            Command::Remove { name, value } => b.remove(&name, value),
            Command::Drop { name } => b.drop_collection(&name),
            Command::Clear { name } => b.clear(&name),
            Command::InterStore { dest, names } => b.inter_store(&dest, &names),
            Command::UnionStore { dest, names } => b.union_store(&dest, &names),
            Command::XorStore { dest, left, right } => b.xor_store(&dest, &left, &right),
            Command::DiffStore { dest, left, right } => b.diff_store(&dest, &left, &right),
            other => {
                return Err(BasaltError::unsupported(format!(
                    "{} is a read and cannot be applied",
                    other.kind()
                )))
            }
        }
        Ok(())
    }

    fn dispatch_read(&self, command: Command) -> BasaltResult<QueryResult> {
        let b = &self.bitmaps;
        let result = match command {
            Command::Exists { name, value } => QueryResult::Bool(b.contains(&name, value)),
            Command::Card { name } => QueryResult::Count(b.cardinality(&name)),
            Command::Inter { names } => QueryResult::Values(b.inter(&names)),
            Command::Union { names } => QueryResult::Values(b.union(&names)),
            Command::Xor { left, right } => QueryResult::Values(b.xor(&left, &right)),
            Command::Diff { left, right } => QueryResult::Values(b.diff(&left, &right)),
            other => {
                return Err(BasaltError::unsupported(format!(
                    "{} is a write and cannot be queried",
                    other.kind()
                )))
            }
        };
        Ok(result)
    }
}

impl ReplicatedStateMachine for BitmapStateMachine {
    fn apply(&mut self, command: &[u8]) -> BasaltResult<()> {
        let result = Command::decode(command).and_then(|cmd| self.dispatch_write(cmd));
        match &result {
            Ok(()) => self.stats.applied += 1,
            Err(_) => self.stats.rejected += 1,
        }
        result
    }

    fn query(&self, query: &[u8]) -> BasaltResult<QueryResult> {
        let command = Self::decode_read(query)?;
        self.dispatch_read(command)
    }

    fn snapshot(&self, sink: &mut dyn Write) -> BasaltResult<()> {
        self.bitmaps
            .save(sink)
            .map_err(|e| BasaltError::internal(format!("snapshot write failed: {}", e)))
    }

    fn restore(&mut self, source: &mut dyn Read) -> BasaltResult<()> {
        // Decode fully before replacing anything.
        let restored =
            Bitmaps::read(source).map_err(|e| BasaltError::snapshot_decode(e.to_string()))?;
        self.bitmaps = restored;
        self.stats.restores += 1;
        Ok(())
    }

    fn digest(&self) -> BasaltResult<u64> {
        Ok(image_digest(&self.snapshot_bytes()?))
    }
}

/// Checksum of a snapshot image. Replicas with equal state have equal digests.
pub fn image_digest(image: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(image);
    hasher.finish()
}
