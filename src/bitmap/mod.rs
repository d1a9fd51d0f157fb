//! Named bitmap collections.
//!
//! A [`Bitmaps`] value maps collection names to ordered sets of `u32`. It
//! offers set algebra across collections and a deterministic image codec:
//! identical logical state always serializes to identical bytes.
//!
//! - [`collection`] - the collection map, algebra, and image codec

pub mod collection;

pub use collection::{Bitmaps, BitmapsStats};
