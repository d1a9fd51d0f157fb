//! Storage layer.
//!
//! - [`snapshot`] - persisted snapshot files written on shutdown and
//!   restored on start

pub mod snapshot;

pub use snapshot::{SnapshotFile, SnapshotMeta};
