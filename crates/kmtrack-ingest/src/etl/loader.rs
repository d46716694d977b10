//! Chunked warehouse loader
//!
//! Splits a transformed batch into bounded-size chunks, submits them
//! with bounded concurrency, and aggregates per-chunk failures: every
//! chunk is attempted, partial success stays committed, and the overall
//! call fails only after all chunks ran. The post-transform snapshot is
//! persisted to blob storage after chunk submission regardless of chunk
//! outcomes, so a partially failed load is still traceable and
//! replayable.
//!
//! Re-running a load for the same source duplicates rows; the warehouse
//! offers no natural key. The batch checksum in the report exists so
//! operators can at least spot re-runs in logs.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use kmtrack_common::checksum::sha256_hex;
use kmtrack_warehouse::client::{with_retries, Warehouse, MAX_ATTEMPTS};
use kmtrack_warehouse::models::TelemetryRow;
use kmtrack_warehouse::query::Table;
use kmtrack_warehouse::storage::BlobStore;
use tracing::{error, info, instrument};

use super::transformer::normalize_field_name;

/// Snapshot column labels, canonicalized the same way as source fields.
const SNAPSHOT_COLUMNS: [&str; 13] = [
    "Vehicle Plate",
    "Driver",
    "Date",
    "Distance Km",
    "Duration Minutes",
    "Idle Minutes",
    "Odometer Start",
    "Odometer End",
    "Distance Delta",
    "Consolidated Cost",
    "Expected Distance",
    "Divergent",
    "Score",
];

/// One failed chunk.
#[derive(Debug, Clone)]
pub struct ChunkError {
    /// 0-based position of the chunk within the batch.
    pub chunk_index: usize,
    pub rows: usize,
    pub reason: String,
}

/// Outcome of a (possibly partial) load.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub rows_loaded: u64,
    pub chunks_total: usize,
    pub chunks_failed: usize,
    /// Key of the staging snapshot, when it could be written.
    pub staging_blob: Option<String>,
    /// SHA-256 of the snapshot content, for spotting re-ingestions.
    pub batch_checksum: String,
}

/// Raised when at least one chunk failed. Successfully loaded chunks
/// remain committed; `partial` describes what did land.
#[derive(Debug)]
pub struct LoadError {
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub chunk_errors: Vec<ChunkError>,
    pub snapshot_error: Option<String>,
    pub partial: LoadReport,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} chunks failed to load",
            self.chunks_failed, self.chunks_total
        )?;
        for err in &self.chunk_errors {
            write!(
                f,
                "; chunk {} ({} rows): {}",
                err.chunk_index, err.rows, err.reason
            )?;
        }
        if let Some(snapshot_error) = &self.snapshot_error {
            write!(f, "; snapshot: {snapshot_error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for LoadError {}

pub struct ChunkedLoader {
    warehouse: Arc<dyn Warehouse>,
    blob: Arc<dyn BlobStore>,
    chunk_size: usize,
    concurrency: usize,
    staging_prefix: String,
}

impl ChunkedLoader {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        blob: Arc<dyn BlobStore>,
        chunk_size: usize,
        concurrency: usize,
        staging_prefix: impl Into<String>,
    ) -> Self {
        Self {
            warehouse,
            blob,
            chunk_size: chunk_size.max(1),
            concurrency: concurrency.max(1),
            staging_prefix: staging_prefix.into(),
        }
    }

    /// Load a batch into `table` and persist its staging snapshot.
    #[instrument(skip(self, rows), fields(source = source_name, rows = rows.len()))]
    pub async fn load(
        &self,
        source_name: &str,
        table: Table,
        rows: &[TelemetryRow],
    ) -> Result<LoadReport, LoadError> {
        let chunks: Vec<&[TelemetryRow]> = rows.chunks(self.chunk_size).collect();
        let chunks_total = chunks.len();

        info!(
            chunks_total,
            chunk_size = self.chunk_size,
            concurrency = self.concurrency,
            "Starting chunked load"
        );

        let results: Vec<(usize, Result<u64, _>)> = stream::iter(chunks.into_iter().enumerate())
            .map(|(index, chunk)| {
                let warehouse = Arc::clone(&self.warehouse);
                async move {
                    let result =
                        with_retries(MAX_ATTEMPTS, || warehouse.insert_rows(table, chunk)).await;
                    (index, chunk.len(), result)
                }
            })
            .buffer_unordered(self.concurrency)
            .map(|(index, len, result)| (index, result.map_err(move |e| (len, e))))
            .collect()
            .await;

        let mut rows_loaded = 0u64;
        let mut chunk_errors = Vec::new();
        for (index, result) in results {
            match result {
                Ok(count) => rows_loaded += count,
                Err((len, e)) => chunk_errors.push(ChunkError {
                    chunk_index: index,
                    rows: len,
                    reason: e.to_string(),
                }),
            }
        }
        chunk_errors.sort_by_key(|e| e.chunk_index);

        // Snapshot happens after chunk submission, never instead of it,
        // and is not skipped when chunks failed.
        let (csv_bytes, batch_checksum) = snapshot_csv(rows);
        let (staging_blob, snapshot_error) = match csv_bytes {
            Ok(bytes) => {
                let key = self.snapshot_key(source_name);
                match self
                    .blob
                    .upload(&key, bytes, Some("text/csv".to_string()))
                    .await
                {
                    Ok(()) => (Some(key), None),
                    Err(e) => {
                        error!(error = %e, "Failed to persist staging snapshot");
                        (None, Some(e.to_string()))
                    },
                }
            },
            Err(e) => {
                error!(error = %e, "Failed to serialize staging snapshot");
                (None, Some(e))
            },
        };

        let report = LoadReport {
            rows_loaded,
            chunks_total,
            chunks_failed: chunk_errors.len(),
            staging_blob,
            batch_checksum,
        };

        if chunk_errors.is_empty() {
            info!(
                rows_loaded,
                staging_blob = report.staging_blob.as_deref().unwrap_or("<none>"),
                "Load complete"
            );
            Ok(report)
        } else {
            Err(LoadError {
                chunks_total,
                chunks_failed: chunk_errors.len(),
                chunk_errors,
                snapshot_error,
                partial: report,
            })
        }
    }

    fn snapshot_key(&self, source_name: &str) -> String {
        let stem = source_stem(source_name);
        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        format!("{}/{}_processed_{}.csv", self.staging_prefix, stem, timestamp)
    }
}

fn source_stem(source_name: &str) -> &str {
    let file = source_name.rsplit('/').next().unwrap_or(source_name);
    file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file)
}

fn field(value: Option<impl ToString>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Serialize the transformed batch to CSV and hash it.
fn snapshot_csv(rows: &[TelemetryRow]) -> (Result<Vec<u8>, String>, String) {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let header: Vec<String> = SNAPSHOT_COLUMNS
        .iter()
        .map(|c| normalize_field_name(c))
        .collect();

    let result = (|| {
        writer.write_record(&header).map_err(|e| e.to_string())?;
        for row in rows {
            writer
                .write_record(&[
                    row.vehicle_plate.clone(),
                    row.driver.clone(),
                    row.date.format("%Y-%m-%d").to_string(),
                    row.distance_km.to_string(),
                    row.duration_minutes.to_string(),
                    row.idle_minutes.to_string(),
                    field(row.odometer_start),
                    field(row.odometer_end),
                    field(row.distance_delta),
                    field(row.consolidated_cost),
                    field(row.expected_distance),
                    field(row.divergent),
                    field(row.score),
                ])
                .map_err(|e| e.to_string())?;
        }
        writer
            .into_inner()
            .map_err(|e| e.to_string())
    })();

    match result {
        Ok(bytes) => {
            let checksum = sha256_hex(&bytes);
            (Ok(bytes), checksum)
        },
        Err(e) => (Err(e), String::new()),
    }
}
