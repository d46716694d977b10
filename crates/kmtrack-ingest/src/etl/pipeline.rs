//! ETL pipeline composition
//!
//! Orchestrates one ingestion run for one source export: download,
//! parse, transform, audit, chunked load, snapshot. Row-level problems
//! are recovered at each stage; the only whole-file abort is an
//! unsupported file type.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use kmtrack_common::KmError;
use kmtrack_warehouse::client::{with_retries, Warehouse, WarehouseError, MAX_ATTEMPTS};
use kmtrack_warehouse::query::Table;
use kmtrack_warehouse::storage::{BlobError, BlobStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::auditor;
use super::config::EtlConfig;
use super::loader::{ChunkedLoader, LoadError};
use super::transformer;
use crate::telemetry::parser::TelemetryParser;

/// Summary of one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlReport {
    pub source: String,
    pub rows_read: usize,
    pub rows_loaded: u64,
    pub rows_skipped: usize,
    /// Skip reason → occurrence count.
    pub skip_reasons: BTreeMap<String, usize>,
    pub duplicates_dropped: usize,
    pub inconsistency_count: usize,
    pub staging_blob: Option<String>,
    pub batch_checksum: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl EtlReport {
    fn empty(source: &str) -> Self {
        Self {
            source: source.to_string(),
            rows_read: 0,
            rows_loaded: 0,
            rows_skipped: 0,
            skip_reasons: BTreeMap::new(),
            duplicates_dropped: 0,
            inconsistency_count: 0,
            staging_blob: None,
            batch_checksum: None,
            processed_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    #[error("Unsupported file type: {0} (expected .csv)")]
    UnsupportedFile(String),
    #[error("Source blob not found: {0}")]
    SourceNotFound(String),
    #[error("Blob storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

impl From<EtlError> for KmError {
    fn from(err: EtlError) -> Self {
        match err {
            EtlError::UnsupportedFile(msg) => KmError::Validation(msg),
            EtlError::SourceNotFound(key) => KmError::NotFound(key),
            EtlError::Storage(msg) => KmError::Storage(msg),
            EtlError::Warehouse(WarehouseError::Transient(msg)) => KmError::TransientWarehouse(msg),
            EtlError::Warehouse(e) => KmError::FatalWarehouse(e.to_string()),
            EtlError::Load(e) => KmError::FatalWarehouse(e.to_string()),
        }
    }
}

pub struct EtlPipeline {
    warehouse: Arc<dyn Warehouse>,
    blob: Arc<dyn BlobStore>,
    config: EtlConfig,
}

impl EtlPipeline {
    pub fn new(warehouse: Arc<dyn Warehouse>, blob: Arc<dyn BlobStore>, config: EtlConfig) -> Self {
        Self {
            warehouse,
            blob,
            config,
        }
    }

    /// Run the pipeline on a blob already in storage.
    pub async fn process_blob(&self, key: &str) -> Result<EtlReport, EtlError> {
        let data = self.blob.download(key).await.map_err(|e| match e {
            BlobError::NotFound(k) => EtlError::SourceNotFound(k),
            BlobError::Other(msg) => EtlError::Storage(msg),
        })?;
        self.process_bytes(key, &data).await
    }

    /// Run the pipeline on raw bytes, e.g. a local file.
    pub async fn process_bytes(&self, source_name: &str, data: &[u8]) -> Result<EtlReport, EtlError> {
        let start_time = Instant::now();

        // The single whole-file abort condition.
        if !source_name.to_lowercase().ends_with(".csv") {
            return Err(EtlError::UnsupportedFile(source_name.to_string()));
        }

        info!(source = source_name, bytes = data.len(), "Starting ingestion");

        if data.is_empty() {
            warn!(source = source_name, "Source file is empty, nothing to do");
            return Ok(EtlReport::empty(source_name));
        }

        // Parse: never aborts on a bad line.
        let parsed = TelemetryParser::new().parse(data);
        let rows_read = parsed.records.len();
        let mut skip_reasons: BTreeMap<String, usize> = BTreeMap::new();
        for skipped in &parsed.skipped {
            *skip_reasons.entry(skipped.reason.clone()).or_default() += 1;
        }
        let rows_skipped = parsed.skipped.len();

        info!(
            source = source_name,
            rows_read,
            rows_skipped,
            "Parsed source file"
        );

        // Register every plate seen in this batch.
        let mut plates: Vec<&str> = parsed
            .records
            .iter()
            .map(|r| r.vehicle_plate.as_str())
            .collect();
        plates.sort_unstable();
        plates.dedup();
        for plate in plates {
            with_retries(MAX_ATTEMPTS, || self.warehouse.upsert_vehicle(plate)).await?;
        }

        // Transform and audit.
        let transformed = transformer::transform(parsed.records);
        let duplicates_dropped = transformed.duplicates_dropped;
        let audited = auditor::audit(transformed.rows);

        // Divergent rows also land in the inconsistency table; failure
        // there must not sink the main load.
        if !audited.divergent_rows.is_empty() {
            let result = with_retries(MAX_ATTEMPTS, || {
                self.warehouse
                    .insert_rows(Table::Inconsistencies, &audited.divergent_rows)
            })
            .await;
            if let Err(e) = result {
                warn!(error = %e, "Failed to record inconsistency rows, continuing");
            }
        }

        // Chunked load plus staging snapshot.
        let loader = ChunkedLoader::new(
            Arc::clone(&self.warehouse),
            Arc::clone(&self.blob),
            self.config.chunk_size,
            self.config.concurrency,
            self.config.staging_prefix.clone(),
        );
        let load_report = loader
            .load(source_name, Table::Telemetry, &audited.rows)
            .await?;

        let report = EtlReport {
            source: source_name.to_string(),
            rows_read,
            rows_loaded: load_report.rows_loaded,
            rows_skipped,
            skip_reasons,
            duplicates_dropped,
            inconsistency_count: audited.inconsistency_count,
            staging_blob: load_report.staging_blob,
            batch_checksum: Some(load_report.batch_checksum),
            processed_at: Utc::now(),
        };

        info!(
            source = source_name,
            rows_read = report.rows_read,
            rows_loaded = report.rows_loaded,
            rows_skipped = report.rows_skipped,
            duplicates_dropped = report.duplicates_dropped,
            inconsistency_count = report.inconsistency_count,
            duration_secs = start_time.elapsed().as_secs_f64(),
            "Ingestion complete"
        );

        Ok(report)
    }
}
