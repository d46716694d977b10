//! The ingestion ETL stages
//!
//! Parse output flows through the transformer (dedup, coercion, derived
//! fields), the auditor (divergence scoring), and the chunked loader
//! (warehouse writes plus the staging snapshot). [`pipeline`] wires the
//! stages together for one source file.

pub mod auditor;
pub mod config;
pub mod loader;
pub mod pipeline;
pub mod transformer;
