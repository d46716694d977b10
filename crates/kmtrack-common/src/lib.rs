//! KmTrack Common Library
//!
//! Shared error taxonomy, logging and checksum utilities for the KmTrack
//! workspace members.
//!
//! # Overview
//!
//! - **Error Handling**: the [`KmError`] taxonomy with stable error codes
//! - **Logging**: `tracing`-based logging initialization
//! - **Checksums**: content hashing for snapshot keys and dedup auditing

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{KmError, Result};
