//! Core runtime infrastructure.
//!
//! This module contains the essential components for running Basalt:
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Main runtime orchestration
//! - [`error`] - Error types and adapter-specific mapping

pub mod config;
pub mod error;
pub mod runtime;
