//! Delete travel command
//!
//! Deletion must respect the warehouse's write-visibility window: rows
//! newer than the window cannot be deleted yet, and the caller gets a
//! retryable conflict with the remaining wait. Once past the window the
//! cascade runs strictly in dependency order, stops, then bill, then the
//! travel itself; a child failure stops the cascade so the parent is
//! never deleted over orphaned children.

use chrono::{DateTime, Duration, Utc};
use kmtrack_common::KmError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::{with_retries, Warehouse, WarehouseError, MAX_ATTEMPTS};

/// Minutes a freshly inserted travel stays undeletable.
pub const VISIBILITY_WINDOW_MINUTES: i64 = 90;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTravelCommand {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTravelResponse {
    pub id: Uuid,
    pub stops_deleted: u64,
    pub bill_deleted: bool,
    pub deleted: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteTravelError {
    #[error("Travel with ID '{0}' not found")]
    NotFound(Uuid),
    #[error(
        "Travel '{id}' is still inside the write-visibility window, retry in {retry_after_minutes} minute(s)"
    )]
    RecentlyCreated { id: Uuid, retry_after_minutes: i64 },
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),
}

impl From<DeleteTravelError> for KmError {
    fn from(err: DeleteTravelError) -> Self {
        match err {
            DeleteTravelError::NotFound(id) => KmError::NotFound(format!("travel {id}")),
            DeleteTravelError::RecentlyCreated {
                id,
                retry_after_minutes,
            } => KmError::Conflict {
                message: format!("travel {id} is still inside the write-visibility window"),
                retry_after_minutes,
            },
            DeleteTravelError::Warehouse(WarehouseError::Transient(msg)) => {
                KmError::TransientWarehouse(msg)
            },
            DeleteTravelError::Warehouse(e) => KmError::FatalWarehouse(e.to_string()),
        }
    }
}

fn remaining_minutes(age: Duration, window: Duration) -> i64 {
    let remaining_secs = (window - age).num_seconds();
    ((remaining_secs + 59) / 60).max(1)
}

/// Handles the delete travel command
///
/// # Errors
///
/// - `NotFound` - No travel with the given id exists
/// - `RecentlyCreated` - The travel is younger than the visibility window;
///   retryable after the carried wait
/// - `Warehouse` - A cascade step failed after transient retries; the
///   parent travel is left in place
#[tracing::instrument(skip(warehouse))]
pub async fn handle<W: Warehouse + ?Sized>(
    warehouse: &W,
    command: DeleteTravelCommand,
) -> Result<DeleteTravelResponse, DeleteTravelError> {
    handle_at(warehouse, command, Utc::now()).await
}

/// Same as [`handle`] but with an explicit clock, so window gating is
/// testable without sleeping.
pub async fn handle_at<W: Warehouse + ?Sized>(
    warehouse: &W,
    command: DeleteTravelCommand,
    now: DateTime<Utc>,
) -> Result<DeleteTravelResponse, DeleteTravelError> {
    let created_at = with_retries(MAX_ATTEMPTS, || warehouse.travel_created_at(command.id))
        .await?
        .ok_or(DeleteTravelError::NotFound(command.id))?;

    let window = Duration::minutes(VISIBILITY_WINDOW_MINUTES);
    let age = now - created_at;
    if age < window {
        return Err(DeleteTravelError::RecentlyCreated {
            id: command.id,
            retry_after_minutes: remaining_minutes(age, window),
        });
    }

    // Dependency order, never parallel: stops, bill, then the travel.
    // Each step retries transient faults before failing the cascade.
    let stops_deleted = with_retries(MAX_ATTEMPTS, || warehouse.delete_stops(command.id)).await?;
    let bill_deleted = with_retries(MAX_ATTEMPTS, || warehouse.delete_bill(command.id)).await? > 0;
    let deleted = with_retries(MAX_ATTEMPTS, || warehouse.delete_travel(command.id)).await? > 0;

    Ok(DeleteTravelResponse {
        id: command.id,
        stops_deleted,
        bill_deleted,
        deleted,
    })
}
