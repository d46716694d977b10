//! KmTrack Ingest Library
//!
//! Batch ingestion of vehicle telemetry exports: block parsing over
//! irregular delimited text, record transformation and divergence
//! auditing, and chunked loading into the analytical warehouse with a
//! staging snapshot for traceability.

pub mod etl;
pub mod telemetry;
