//! KmTrack Ingest - telemetry ingestion tool

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kmtrack_common::logging::{init_logging, LogConfig, LogLevel};
use kmtrack_common::KmError;
use kmtrack_ingest::etl::config::EtlConfig;
use kmtrack_ingest::etl::pipeline::EtlPipeline;
use kmtrack_warehouse::pg::PgWarehouse;
use kmtrack_warehouse::storage::{config::StorageConfig, S3BlobStore};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kmtrack-ingest")]
#[command(author, version, about = "KmTrack telemetry ingestion tool")]
struct Cli {
    /// Ingestion source
    #[command(subcommand)]
    source: Source,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Source {
    /// Ingest a telemetry export already in blob storage
    ProcessBlob {
        /// Blob key, e.g. raw/trips_2024-03.csv
        key: String,
    },

    /// Ingest a local telemetry export file
    ProcessFile {
        /// Path to the export file
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Environment configuration takes precedence over the verbose flag.
    let mut log_config = LogConfig::from_env()?;
    if cli.verbose && std::env::var("LOG_LEVEL").is_err() {
        log_config.level = LogLevel::Debug;
    }
    log_config.log_file_prefix = "kmtrack-ingest".to_string();
    init_logging(&log_config)?;

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("Failed to connect to the warehouse")?;

    let blob = S3BlobStore::new(StorageConfig::from_env()?)
        .await
        .context("Failed to initialize blob storage")?;

    let pipeline = EtlPipeline::new(
        Arc::new(PgWarehouse::new(pool)),
        Arc::new(blob),
        EtlConfig::load()?,
    );

    let result = match cli.source {
        Source::ProcessBlob { key } => {
            info!(key = %key, "Ingesting blob");
            pipeline.process_blob(&key).await
        },
        Source::ProcessFile { path } => {
            info!(path = %path, "Ingesting local file");
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {path}"))?;
            pipeline.process_bytes(&path, &data).await
        },
    };

    match result {
        Ok(report) => {
            info!(
                report = %serde_json::to_string(&report)?,
                "Ingestion complete"
            );
            Ok(())
        },
        Err(e) => {
            let km = KmError::from(e);
            error!(code = km.code(), error = %km, "Ingestion failed");
            Err(km.into())
        },
    }
}
