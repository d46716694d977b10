//! KmTrack Warehouse Library
//!
//! Typed access to the analytical warehouse holding fleet telemetry,
//! travels and billing data, plus the query/command features built on it.
//!
//! # Overview
//!
//! - **Client**: the [`Warehouse`] trait and its Postgres implementation
//! - **Query building**: allow-listed tables/columns with bound predicates
//! - **Models**: typed travel, bill, stop and telemetry rows
//! - **Periods**: the single calendar truncation rule used by every
//!   aggregation path
//! - **Storage**: the [`BlobStore`] seam over S3-compatible object storage
//! - **Features**: dashboard queries and travel commands

pub mod client;
pub mod features;
pub mod models;
pub mod period;
pub mod pg;
pub mod query;
pub mod storage;
pub mod testing;

pub use client::{Warehouse, WarehouseError};
pub use models::{Bill, Stop, TelemetryRow, Travel, TravelCostRow, TravelRow, Vehicle};
pub use period::Period;
pub use storage::{BlobError, BlobStore};
