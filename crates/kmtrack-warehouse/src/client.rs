//! The warehouse client seam
//!
//! [`Warehouse`] abstracts the analytical store so the ingestion pipeline
//! and the dashboard features can run against Postgres in production and
//! in-memory fakes in tests. Errors are split into the three classes the
//! callers react to differently: a missing table (degraded aggregation),
//! a transient fault (retry), and everything else (fail the operation).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::models::{TelemetryRow, TravelCostRow, TravelRow};
use crate::query::{Predicate, Table};

/// Postgres error code for "relation does not exist".
const UNDEFINED_TABLE: &str = "42P01";

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// The queried table does not exist in the warehouse.
    #[error("Warehouse table not found: {0}")]
    TableNotFound(String),
    /// A fault that is expected to clear on retry (timeouts, lost
    /// connections).
    #[error("Transient warehouse error: {0}")]
    Transient(String),
    /// Everything else; retrying will not help.
    #[error("Warehouse error: {0}")]
    Fatal(String),
}

impl From<sqlx::Error> for WarehouseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some(UNDEFINED_TABLE) {
                    WarehouseError::TableNotFound(db_err.message().to_string())
                } else {
                    WarehouseError::Fatal(err.to_string())
                }
            },
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => WarehouseError::Transient(err.to_string()),
            _ => WarehouseError::Fatal(err.to_string()),
        }
    }
}

/// Filter over travel rows, expressed as allow-listed predicates.
#[derive(Debug, Clone, Default)]
pub struct TravelFilter {
    pub predicates: Vec<Predicate>,
}

impl TravelFilter {
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }
}

/// Typed operations against the analytical warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Ensure a vehicle exists for `plate`, returning its id.
    async fn upsert_vehicle(&self, plate: &str) -> Result<Uuid, WarehouseError>;

    /// Append telemetry rows to `table`, returning the row count written.
    async fn insert_rows(
        &self,
        table: Table,
        rows: &[TelemetryRow],
    ) -> Result<u64, WarehouseError>;

    /// Fetch travels joined with their bills for cost aggregation.
    async fn fetch_travel_costs(
        &self,
        filter: &TravelFilter,
    ) -> Result<Vec<TravelCostRow>, WarehouseError>;

    /// Fetch bare travels; the fallback when billing data is unavailable.
    async fn fetch_travels(&self, filter: &TravelFilter) -> Result<Vec<TravelRow>, WarehouseError>;

    /// When the travel exists, the instant its row was created.
    async fn travel_created_at(
        &self,
        travel_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, WarehouseError>;

    /// Delete all stops of a travel, returning the count removed.
    async fn delete_stops(&self, travel_id: Uuid) -> Result<u64, WarehouseError>;

    /// Delete the travel's bill, returning the count removed (0 or 1).
    async fn delete_bill(&self, travel_id: Uuid) -> Result<u64, WarehouseError>;

    /// Delete the travel row itself, returning the count removed (0 or 1).
    async fn delete_travel(&self, travel_id: Uuid) -> Result<u64, WarehouseError>;
}

const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Attempts every caller of [`with_retries`] uses for a single
/// warehouse call.
pub const MAX_ATTEMPTS: u32 = 3;

/// Run `op`, retrying transient warehouse errors with capped exponential
/// backoff. Table-not-found and fatal errors surface immediately.
pub async fn with_retries<T, F, Fut>(max_attempts: u32, mut op: F) -> Result<T, WarehouseError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WarehouseError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(WarehouseError::Transient(msg)) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(WarehouseError::Transient(msg));
                }
                let delay = RETRY_BASE_DELAY
                    .saturating_mul(2u32.saturating_pow(attempt - 1))
                    .min(RETRY_MAX_DELAY);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %msg,
                    "Transient warehouse error, retrying"
                );
                tokio::time::sleep(delay).await;
            },
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_sqlx_error_classification() {
        let err: WarehouseError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, WarehouseError::Transient(_)));

        let err: WarehouseError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, WarehouseError::Fatal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retries_recovers_from_transient() {
        let calls = AtomicU32::new(0);
        let result = with_retries(5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(WarehouseError::Transient("flaky".into()))
                } else {
                    Ok(42u64)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retries_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(WarehouseError::Transient("still down".into())) }
        })
        .await;
        assert!(matches!(result, Err(WarehouseError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retries_does_not_retry_fatal() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(WarehouseError::Fatal("bad query".into())) }
        })
        .await;
        assert!(matches!(result, Err(WarehouseError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retries_does_not_retry_missing_table() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(WarehouseError::TableNotFound("bills".into())) }
        })
        .await;
        assert!(matches!(result, Err(WarehouseError::TableNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
