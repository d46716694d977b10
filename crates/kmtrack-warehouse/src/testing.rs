//! In-memory fakes for the warehouse and blob-store seams
//!
//! Used across the workspace's unit tests so pipeline and feature logic
//! can be exercised without Postgres or an object store. The fakes record
//! calls and support targeted failure injection.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::client::{TravelFilter, Warehouse, WarehouseError};
use crate::models::{TelemetryRow, TravelCostRow, TravelRow};
use crate::query::{BindValue, Column, Predicate, Table};
use crate::storage::{BlobError, BlobStore};

/// In-memory [`Warehouse`] fake.
///
/// Lock poisoning aborts the test, so lock unwraps are fine here.
#[derive(Default)]
pub struct MemoryWarehouse {
    vehicles: Mutex<HashMap<String, Uuid>>,
    inserted: Mutex<HashMap<&'static str, Vec<TelemetryRow>>>,
    travel_costs: Mutex<Vec<TravelCostRow>>,
    travels: Mutex<Vec<TravelRow>>,
    created_at: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    stop_counts: Mutex<HashMap<Uuid, u64>>,
    bill_counts: Mutex<HashMap<Uuid, u64>>,
    deletions: Mutex<Vec<String>>,
    missing_tables: Mutex<HashSet<&'static str>>,
    failing_insert_plates: Mutex<HashSet<String>>,
    transient_failures: Mutex<HashMap<&'static str, u32>>,
    fail_bill_delete: Mutex<bool>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a table as absent; queries against it return
    /// [`WarehouseError::TableNotFound`].
    pub fn drop_table(&self, table: Table) {
        self.missing_tables.lock().unwrap().insert(table.name());
    }

    /// Make `insert_rows` fail with a fatal error whenever the batch
    /// contains a row for `plate`.
    pub fn fail_insert_for_plate(&self, plate: &str) {
        self.failing_insert_plates
            .lock()
            .unwrap()
            .insert(plate.to_string());
    }

    /// Make the next `times` invocations of the named operation (e.g.
    /// `"fetch_travel_costs"`) fail with a transient error, then recover.
    pub fn fail_transient(&self, op: &'static str, times: u32) {
        self.transient_failures.lock().unwrap().insert(op, times);
    }

    /// Make `delete_bill` fail with a transient error.
    pub fn fail_bill_delete(&self) {
        *self.fail_bill_delete.lock().unwrap() = true;
    }

    pub fn seed_travel_cost(&self, row: TravelCostRow) {
        self.travel_costs.lock().unwrap().push(row);
    }

    pub fn seed_travel(&self, row: TravelRow) {
        self.travels.lock().unwrap().push(row);
    }

    pub fn seed_travel_record(
        &self,
        travel_id: Uuid,
        created_at: DateTime<Utc>,
        stops: u64,
        bills: u64,
    ) {
        self.created_at.lock().unwrap().insert(travel_id, created_at);
        self.stop_counts.lock().unwrap().insert(travel_id, stops);
        self.bill_counts.lock().unwrap().insert(travel_id, bills);
    }

    /// All rows inserted into `table`, in call order.
    pub fn rows_in(&self, table: Table) -> Vec<TelemetryRow> {
        self.inserted
            .lock()
            .unwrap()
            .get(table.name())
            .cloned()
            .unwrap_or_default()
    }

    /// Recorded deletions, e.g. `"stops:<uuid>"`, in execution order.
    pub fn recorded_deletions(&self) -> Vec<String> {
        self.deletions.lock().unwrap().clone()
    }

    fn check_table(&self, table: &'static str) -> Result<(), WarehouseError> {
        if self.missing_tables.lock().unwrap().contains(table) {
            Err(WarehouseError::TableNotFound(table.to_string()))
        } else {
            Ok(())
        }
    }

    fn transient_hiccup(&self, op: &'static str) -> Result<(), WarehouseError> {
        let mut failures = self.transient_failures.lock().unwrap();
        if let Some(left) = failures.get_mut(op) {
            if *left > 0 {
                *left -= 1;
                return Err(WarehouseError::Transient(format!(
                    "injected {op} connection reset"
                )));
            }
        }
        Ok(())
    }
}

fn cost_row_matches(row: &TravelCostRow, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|p| match p {
        Predicate::DateRange { column, start, end } if *column == Column::Datetime => {
            row.datetime >= *start && row.datetime < *end
        },
        Predicate::Equals {
            column: Column::UnitId,
            value: BindValue::Text(unit),
        } => row.unit_id.as_deref() == Some(unit.as_str()),
        Predicate::IsNull {
            column: Column::UnitId,
        } => row.unit_id.is_none(),
        _ => true,
    })
}

fn travel_row_matches(row: &TravelRow, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|p| match p {
        Predicate::DateRange { column, start, end } if *column == Column::Datetime => {
            row.datetime >= *start && row.datetime < *end
        },
        Predicate::Equals {
            column: Column::UnitId,
            value: BindValue::Text(unit),
        } => row.unit_id.as_deref() == Some(unit.as_str()),
        Predicate::IsNull {
            column: Column::UnitId,
        } => row.unit_id.is_none(),
        _ => true,
    })
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn upsert_vehicle(&self, plate: &str) -> Result<Uuid, WarehouseError> {
        self.check_table(Table::Vehicles.name())?;
        self.transient_hiccup("upsert_vehicle")?;
        let mut vehicles = self.vehicles.lock().unwrap();
        Ok(*vehicles
            .entry(plate.to_string())
            .or_insert_with(Uuid::new_v4))
    }

    async fn insert_rows(
        &self,
        table: Table,
        rows: &[TelemetryRow],
    ) -> Result<u64, WarehouseError> {
        self.check_table(table.name())?;
        self.transient_hiccup("insert_rows")?;

        {
            let poisoned = self.failing_insert_plates.lock().unwrap();
            if let Some(row) = rows.iter().find(|r| poisoned.contains(&r.vehicle_plate)) {
                return Err(WarehouseError::Fatal(format!(
                    "injected insert failure for plate {}",
                    row.vehicle_plate
                )));
            }
        }

        self.inserted
            .lock()
            .unwrap()
            .entry(table.name())
            .or_default()
            .extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn fetch_travel_costs(
        &self,
        filter: &TravelFilter,
    ) -> Result<Vec<TravelCostRow>, WarehouseError> {
        self.check_table(Table::Bills.name())?;
        self.check_table(Table::Travels.name())?;
        self.transient_hiccup("fetch_travel_costs")?;
        Ok(self
            .travel_costs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| cost_row_matches(r, &filter.predicates))
            .cloned()
            .collect())
    }

    async fn fetch_travels(&self, filter: &TravelFilter) -> Result<Vec<TravelRow>, WarehouseError> {
        self.check_table(Table::Travels.name())?;
        self.transient_hiccup("fetch_travels")?;
        Ok(self
            .travels
            .lock()
            .unwrap()
            .iter()
            .filter(|r| travel_row_matches(r, &filter.predicates))
            .cloned()
            .collect())
    }

    async fn travel_created_at(
        &self,
        travel_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, WarehouseError> {
        self.check_table(Table::Travels.name())?;
        self.transient_hiccup("travel_created_at")?;
        Ok(self.created_at.lock().unwrap().get(&travel_id).copied())
    }

    async fn delete_stops(&self, travel_id: Uuid) -> Result<u64, WarehouseError> {
        self.check_table(Table::Stops.name())?;
        self.transient_hiccup("delete_stops")?;
        self.deletions
            .lock()
            .unwrap()
            .push(format!("stops:{travel_id}"));
        Ok(self
            .stop_counts
            .lock()
            .unwrap()
            .remove(&travel_id)
            .unwrap_or(0))
    }

    async fn delete_bill(&self, travel_id: Uuid) -> Result<u64, WarehouseError> {
        self.check_table(Table::Bills.name())?;
        self.transient_hiccup("delete_bill")?;
        if *self.fail_bill_delete.lock().unwrap() {
            return Err(WarehouseError::Transient(
                "injected bill delete failure".to_string(),
            ));
        }
        self.deletions
            .lock()
            .unwrap()
            .push(format!("bill:{travel_id}"));
        Ok(self
            .bill_counts
            .lock()
            .unwrap()
            .remove(&travel_id)
            .unwrap_or(0))
    }

    async fn delete_travel(&self, travel_id: Uuid) -> Result<u64, WarehouseError> {
        self.check_table(Table::Travels.name())?;
        self.transient_hiccup("delete_travel")?;
        self.deletions
            .lock()
            .unwrap()
            .push(format!("travel:{travel_id}"));
        Ok(self
            .created_at
            .lock()
            .unwrap()
            .remove(&travel_id)
            .map(|_| 1)
            .unwrap_or(0))
    }
}

/// In-memory [`BlobStore`] fake.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_upload_prefix: Mutex<Option<String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object so `download` can find it.
    pub fn put(&self, key: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), data);
    }

    /// Stored bytes for `key`, if present.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// All stored keys.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Make uploads under `prefix` fail.
    pub fn fail_uploads_under(&self, prefix: &str) {
        *self.fail_upload_prefix.lock().unwrap() = Some(prefix.to_string());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn download(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: Option<String>,
    ) -> Result<(), BlobError> {
        if let Some(prefix) = self.fail_upload_prefix.lock().unwrap().as_deref() {
            if key.starts_with(prefix) {
                return Err(BlobError::Other(format!(
                    "injected upload failure for {key}"
                )));
            }
        }
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}
