//! Basalt - replicated named-bitmap store.
//!
//! Clients mutate and query named sets of 32-bit integers. Every mutation is
//! committed through a replicated log before it is applied, so every replica
//! applying the same log converges to identical state. Two wire protocols,
//! a framed binary RPC and plain HTTP, share one listening endpoint; the
//! protocol of each connection is recognised from its leading bytes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Shared endpoint (net::mux)                      │
//! │        magic byte 0x08 ──► RPC      request line ──► HTTP       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Protocol Adapters                          │
//! │          parse ──► Command ──► propose / read (deadline)        │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Consensus Gateway                          │
//! │          leader admission │ log │ compaction │ catch-up         │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Bitmap State Machine                          │
//! │      apply │ query │ snapshot │ restore │ digest                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Main runtime orchestration
//! - [`core::error`] - Error types and mapping
//!
//! ## Data
//! - [`bitmap`] - Named bitmap collections and their image codec
//!
//! ## Replication
//! - [`replica::command`] - Command model and wire record
//! - [`replica::state_machine`] - Deterministic state machine
//! - [`replica::gateway`] - Consensus gateway contract
//! - [`replica::local`] - In-process replica group
//!
//! ## Storage
//! - [`storage::snapshot`] - Persisted snapshot files
//!
//! ## Networking
//! - [`net::tcp`] - TCP listener with connection accounting
//! - [`net::rewind`] - Replaying stream wrapper
//! - [`net::mux`] - Connection multiplexer
//!
//! ## Adapters
//! - [`adapters::rpc`] - Binary RPC server, codec and client
//! - [`adapters::http`] - HTTP router
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations

// Core infrastructure
pub mod core;

// Bitmap collections
pub mod bitmap;

// Command model, state machine and gateway
pub mod replica;

// Storage layer
pub mod storage;

// Networking
pub mod net;

// Protocol adapters
pub mod adapters;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime};
pub use adapters::{http, rpc};
pub use replica::{command, gateway, state_machine};
