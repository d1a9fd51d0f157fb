//! Replication layer.
//!
//! - [`command`] - operation kinds, wire record, typed commands and results
//! - [`state_machine`] - deterministic apply/query/snapshot/restore/digest
//! - [`gateway`] - consensus gateway contract consumed by translators
//! - [`local`] - in-process replica group implementing the gateway

pub mod command;
pub mod gateway;
pub mod local;
pub mod state_machine;

pub use command::{Command, OpClass, OpKind, Operation, QueryResult};
pub use gateway::{propose_command, read_command, ConsensusGateway, GatewayFuture};
pub use local::{LocalCluster, LocalClusterConfig, LocalGateway};
pub use state_machine::{image_digest, BitmapStateMachine, ReplicatedStateMachine};
