//! Telemetry export format support
//!
//! The source files mix vehicle-identity header lines and per-trip data
//! lines with no consistent schema; columns are positional, not named.

pub mod layout;
pub mod models;
pub mod parser;
