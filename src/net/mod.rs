//! Networking layer.
//!
//! - [`tcp`] - TCP listener with connection accounting
//! - [`rewind`] - stream wrapper that replays already-read bytes
//! - [`mux`] - leading-byte classification onto per-protocol listeners

pub mod mux;
pub mod rewind;
pub mod tcp;

pub use mux::{
    Http1Matcher, MagicByteMatcher, MatchOutcome, MuxConfig, MuxListener, MuxMetrics,
    MuxedStream, Multiplexer, ProtocolMatcher,
};
pub use rewind::RewindStream;
pub use tcp::{TcpConnection, TcpListener, TcpListenerConfig};
