//! Error types for KmTrack

use thiserror::Error;

/// Result type alias for KmTrack operations
pub type Result<T> = std::result::Result<T, KmError>;

/// Main error type for KmTrack
///
/// Variants follow the failure taxonomy of the ingestion and reporting
/// pipeline: row- or request-scoped validation problems, missing parent
/// entities, deletions attempted inside the warehouse write-visibility
/// window, and warehouse failures split into retryable and fatal.
#[derive(Error, Debug)]
pub enum KmError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: retry after {retry_after_minutes} minute(s): {message}")]
    Conflict {
        message: String,
        retry_after_minutes: i64,
    },

    #[error("Transient warehouse error: {0}")]
    TransientWarehouse(String),

    #[error("Fatal warehouse error: {0}")]
    FatalWarehouse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KmError {
    /// Stable machine-readable code for user-visible structured errors.
    pub fn code(&self) -> &'static str {
        match self {
            KmError::Validation(_) => "VALIDATION_ERROR",
            KmError::NotFound(_) => "NOT_FOUND",
            KmError::Conflict { .. } => "STREAMING_BUFFER_CONFLICT",
            KmError::TransientWarehouse(_) => "WAREHOUSE_TRANSIENT_ERROR",
            KmError::FatalWarehouse(_) => "WAREHOUSE_ERROR",
            KmError::Storage(_) => "STORAGE_ERROR",
            KmError::Config(_) => "CONFIG_ERROR",
            KmError::Io(_) => "IO_ERROR",
            KmError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the caller may retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KmError::Conflict { .. } | KmError::TransientWarehouse(_)
        )
    }
}
