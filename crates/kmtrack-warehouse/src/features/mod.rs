//! Feature modules organized by domain area
//!
//! Each feature exposes queries (reads) and commands (writes) as
//! standalone handler functions over the [`Warehouse`] seam.
//!
//! [`Warehouse`]: crate::client::Warehouse

pub mod dashboard;
pub mod travels;
