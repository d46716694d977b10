//! Cost evolution query
//!
//! Time-bucketed cost and distance aggregation over travels and their
//! bills, for the dashboard's evolution chart. Buckets are ordered
//! ascending by bucket start and the limit keeps the oldest buckets, so
//! callers can render the series left to right.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{with_retries, TravelFilter, Warehouse, WarehouseError, MAX_ATTEMPTS};
use crate::models::TravelCostRow;
use crate::period::Period;
use crate::query::{BindValue, Column, Predicate};

/// Default number of buckets returned when no limit is given.
pub const DEFAULT_LIMIT: u32 = 12;
/// Trailing range applied when no start/end is given, in days.
pub const DEFAULT_RANGE_DAYS: i64 = 30;

/// Query for time-bucketed cost aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEvolutionQuery {
    pub period: Period,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// One aggregated time bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodBucket {
    pub label: String,
    pub bucket_start: DateTime<Utc>,
    pub travel_count: u64,
    pub total_distance_km: f64,
    pub fix_cost: f64,
    pub variable_cost: f64,
    pub total_cost: f64,
    pub avg_cost: f64,
}

/// Response containing the ordered bucket series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEvolutionResponse {
    pub period: Period,
    pub buckets: Vec<PeriodBucket>,
    /// True when billing data was unavailable and costs are zeroed.
    pub degraded: bool,
}

/// Errors that can occur when computing cost evolution
#[derive(Debug, thiserror::Error)]
pub enum CostEvolutionError {
    /// Limit must be between 1 and 100
    #[error("Limit must be between 1 and 100")]
    InvalidLimit,
    /// Start must precede end
    #[error("Start of range must precede its end")]
    InvalidRange,
    /// A warehouse error occurred
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),
}

impl CostEvolutionQuery {
    /// Validates the query parameters
    pub fn validate(&self) -> Result<(), CostEvolutionError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=100).contains(&limit) {
            return Err(CostEvolutionError::InvalidLimit);
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start >= end {
                return Err(CostEvolutionError::InvalidRange);
            }
        }
        Ok(())
    }

    fn resolve_range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.end.unwrap_or(now);
        let start = self
            .start
            .unwrap_or_else(|| end - Duration::days(DEFAULT_RANGE_DAYS));
        (start, end)
    }

    fn filter(&self, now: DateTime<Utc>) -> TravelFilter {
        let (start, end) = self.resolve_range(now);
        let mut predicates = vec![Predicate::DateRange {
            column: Column::Datetime,
            start,
            end,
        }];
        if let Some(unit) = &self.unit_id {
            predicates.push(Predicate::Equals {
                column: Column::UnitId,
                value: BindValue::Text(unit.clone()),
            });
        }
        TravelFilter::new(predicates)
    }
}

#[derive(Default)]
struct BucketAccumulator {
    travel_count: u64,
    total_distance_km: f64,
    fix_cost: f64,
    variable_cost: f64,
    total_cost: f64,
}

/// Fetch travel cost rows for a filter, falling back to a cost-free
/// travels fetch when the billing table is missing. Transient faults
/// are retried with capped backoff before either path gives up.
///
/// Shared with the summary query so both report the same degraded
/// behavior for the same warehouse state.
pub(crate) async fn fetch_rows_degradable<W: Warehouse + ?Sized>(
    warehouse: &W,
    filter: &TravelFilter,
) -> Result<(Vec<TravelCostRow>, bool), WarehouseError> {
    match with_retries(MAX_ATTEMPTS, || warehouse.fetch_travel_costs(filter)).await {
        Ok(rows) => Ok((rows, false)),
        Err(WarehouseError::TableNotFound(table)) => {
            warn!(table = %table, "Billing table unavailable, serving distance-only aggregation");
            let travels = with_retries(MAX_ATTEMPTS, || warehouse.fetch_travels(filter)).await?;
            let rows = travels
                .into_iter()
                .map(|t| TravelCostRow {
                    travel_id: t.travel_id,
                    datetime: t.datetime,
                    full_distance: t.full_distance,
                    unit_id: t.unit_id,
                    fix_cost: None,
                    variable_km: None,
                })
                .collect();
            Ok((rows, true))
        },
        Err(e) => Err(e),
    }
}

/// Handles the cost evolution query
///
/// Buckets travels by the requested period, pricing each through the
/// canonical cost rule. Travels without a bill contribute distance and
/// count but zero cost. When the billing table is missing entirely the
/// whole response degrades to distance-only rather than failing.
///
/// # Errors
///
/// - `InvalidLimit` - Limit outside 1..=100
/// - `InvalidRange` - Start not before end
/// - `Warehouse` - A non-degradable warehouse error occurred
#[tracing::instrument(skip(warehouse))]
pub async fn handle<W: Warehouse + ?Sized>(
    warehouse: &W,
    query: CostEvolutionQuery,
) -> Result<CostEvolutionResponse, CostEvolutionError> {
    query.validate()?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT) as usize;
    let filter = query.filter(Utc::now());

    let (rows, degraded) = fetch_rows_degradable(warehouse, &filter).await?;

    let mut accumulators: BTreeMap<DateTime<Utc>, BucketAccumulator> = BTreeMap::new();
    for row in &rows {
        let bucket_start = query.period.truncate(row.datetime);
        let acc = accumulators.entry(bucket_start).or_default();
        acc.travel_count += 1;
        acc.total_distance_km += row.full_distance;
        acc.fix_cost += row.fix_portion();
        acc.variable_cost += row.variable_portion();
        acc.total_cost += row.cost();
    }

    let mut buckets: Vec<PeriodBucket> = accumulators
        .into_iter()
        .map(|(bucket_start, acc)| PeriodBucket {
            label: query.period.label(bucket_start),
            bucket_start,
            travel_count: acc.travel_count,
            total_distance_km: acc.total_distance_km,
            fix_cost: acc.fix_cost,
            variable_cost: acc.variable_cost,
            total_cost: acc.total_cost,
            avg_cost: if acc.travel_count > 0 {
                acc.total_cost / acc.travel_count as f64
            } else {
                0.0
            },
        })
        .collect();

    buckets.truncate(limit);

    Ok(CostEvolutionResponse {
        period: query.period,
        buckets,
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::total_cost;
    use crate::query::Table;
    use crate::testing::MemoryWarehouse;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn cost_row(
        datetime: DateTime<Utc>,
        distance: f64,
        bill: Option<(f64, f64)>,
        unit: Option<&str>,
    ) -> TravelCostRow {
        TravelCostRow {
            travel_id: Uuid::new_v4(),
            datetime,
            full_distance: distance,
            unit_id: unit.map(|u| u.to_string()),
            fix_cost: bill.map(|(f, _)| f),
            variable_km: bill.map(|(_, v)| v),
        }
    }

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    fn base_query(period: Period) -> CostEvolutionQuery {
        CostEvolutionQuery {
            period,
            start: Some(day(1, 0)),
            end: Some(day(28, 0)),
            unit_id: None,
            limit: None,
        }
    }

    #[test]
    fn test_validation_rejects_bad_limit() {
        let mut query = base_query(Period::Day);
        query.limit = Some(0);
        assert!(matches!(
            query.validate(),
            Err(CostEvolutionError::InvalidLimit)
        ));
        query.limit = Some(101);
        assert!(matches!(
            query.validate(),
            Err(CostEvolutionError::InvalidLimit)
        ));
        query.limit = Some(100);
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_inverted_range() {
        let mut query = base_query(Period::Day);
        query.start = Some(day(10, 0));
        query.end = Some(day(5, 0));
        assert!(matches!(
            query.validate(),
            Err(CostEvolutionError::InvalidRange)
        ));
    }

    #[test]
    fn test_default_range_is_trailing_30_days() {
        let query = CostEvolutionQuery {
            period: Period::Day,
            start: None,
            end: None,
            unit_id: None,
            limit: None,
        };
        let now = day(31, 12);
        let (start, end) = query.resolve_range(now);
        assert_eq!(end, now);
        assert_eq!(end - start, Duration::days(30));
    }

    #[tokio::test]
    async fn test_buckets_ascending_with_costs() {
        let warehouse = MemoryWarehouse::new();
        warehouse.seed_travel_cost(cost_row(day(10, 8), 100.0, Some((50.0, 1.0)), None));
        warehouse.seed_travel_cost(cost_row(day(10, 17), 50.0, Some((20.0, 2.0)), None));
        warehouse.seed_travel_cost(cost_row(day(12, 9), 80.0, None, None));

        let response = handle(&warehouse, base_query(Period::Day)).await.unwrap();
        assert!(!response.degraded);
        assert_eq!(response.buckets.len(), 2);

        let first = &response.buckets[0];
        assert_eq!(first.label, "2024-03-10");
        assert_eq!(first.travel_count, 2);
        assert!((first.total_distance_km - 150.0).abs() < 1e-9);
        // 50 + 1*100 = 150; 20 + 2*50 = 120.
        assert!((first.total_cost - 270.0).abs() < 1e-9);
        assert!((first.avg_cost - 135.0).abs() < 1e-9);

        // The unbilled travel contributes distance but zero cost.
        let second = &response.buckets[1];
        assert_eq!(second.travel_count, 1);
        assert!((second.total_distance_km - 80.0).abs() < 1e-9);
        assert_eq!(second.total_cost, 0.0);

        assert!(first.bucket_start < second.bucket_start);
    }

    #[tokio::test]
    async fn test_bucket_cost_matches_canonical_formula() {
        let warehouse = MemoryWarehouse::new();
        warehouse.seed_travel_cost(cost_row(day(5, 8), 40.0, Some((100.0, 2.5)), None));

        let response = handle(&warehouse, base_query(Period::Day)).await.unwrap();
        let bucket = &response.buckets[0];
        assert!((bucket.total_cost - total_cost(100.0, 2.5, 40.0)).abs() < 1e-9);
        assert!((bucket.fix_cost + bucket.variable_cost - bucket.total_cost).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_limit_keeps_oldest_buckets() {
        let warehouse = MemoryWarehouse::new();
        for d in [3, 7, 11, 15] {
            warehouse.seed_travel_cost(cost_row(day(d, 8), 10.0, Some((1.0, 1.0)), None));
        }

        let mut query = base_query(Period::Day);
        query.limit = Some(2);
        let response = handle(&warehouse, query).await.unwrap();
        assert_eq!(response.buckets.len(), 2);
        assert_eq!(response.buckets[0].label, "2024-03-03");
        assert_eq!(response.buckets[1].label, "2024-03-07");
    }

    #[tokio::test]
    async fn test_weekly_bucketing_groups_by_iso_week() {
        let warehouse = MemoryWarehouse::new();
        // 2024-03-04 (Mon) and 2024-03-10 (Sun) share an ISO week;
        // 2024-03-11 (Mon) opens the next one.
        warehouse.seed_travel_cost(cost_row(day(4, 8), 10.0, Some((1.0, 0.0)), None));
        warehouse.seed_travel_cost(cost_row(day(10, 8), 10.0, Some((1.0, 0.0)), None));
        warehouse.seed_travel_cost(cost_row(day(11, 8), 10.0, Some((1.0, 0.0)), None));

        let response = handle(&warehouse, base_query(Period::Week)).await.unwrap();
        assert_eq!(response.buckets.len(), 2);
        assert_eq!(response.buckets[0].travel_count, 2);
        assert_eq!(response.buckets[0].label, "2024-W10");
        assert_eq!(response.buckets[1].travel_count, 1);
    }

    #[tokio::test]
    async fn test_unit_filter_applies() {
        let warehouse = MemoryWarehouse::new();
        warehouse.seed_travel_cost(cost_row(day(5, 8), 10.0, Some((1.0, 0.0)), Some("unit-7")));
        warehouse.seed_travel_cost(cost_row(day(5, 9), 99.0, Some((1.0, 0.0)), Some("unit-9")));

        let mut query = base_query(Period::Day);
        query.unit_id = Some("unit-7".to_string());
        let response = handle(&warehouse, query).await.unwrap();
        assert_eq!(response.buckets.len(), 1);
        assert!((response.buckets[0].total_distance_km - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_degraded_mode_when_bills_table_missing() {
        let warehouse = MemoryWarehouse::new();
        warehouse.drop_table(Table::Bills);
        for d in 1..=10 {
            warehouse.seed_travel(crate::models::TravelRow {
                travel_id: Uuid::new_v4(),
                datetime: day(d, 8),
                full_distance: 25.0,
                unit_id: None,
            });
        }

        let response = handle(&warehouse, base_query(Period::Month)).await.unwrap();
        assert!(response.degraded);
        assert_eq!(response.buckets.len(), 1);
        assert_eq!(response.buckets[0].travel_count, 10);
        assert!((response.buckets[0].total_distance_km - 250.0).abs() < 1e-9);
        assert_eq!(response.buckets[0].total_cost, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fetch_error_is_retried() {
        let warehouse = MemoryWarehouse::new();
        warehouse.seed_travel_cost(cost_row(day(5, 8), 10.0, Some((1.0, 0.0)), None));
        warehouse.fail_transient("fetch_travel_costs", 1);

        let response = handle(&warehouse, base_query(Period::Day)).await.unwrap();
        assert!(!response.degraded);
        assert_eq!(response.buckets.len(), 1);
        assert_eq!(response.buckets[0].travel_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_transient_error_surfaces_after_retries() {
        let warehouse = MemoryWarehouse::new();
        warehouse.fail_transient("fetch_travel_costs", u32::MAX);

        let result = handle(&warehouse, base_query(Period::Day)).await;
        assert!(matches!(
            result,
            Err(CostEvolutionError::Warehouse(WarehouseError::Transient(_)))
        ));
    }

    #[tokio::test]
    async fn test_missing_travels_table_is_a_hard_error() {
        let warehouse = MemoryWarehouse::new();
        warehouse.drop_table(Table::Travels);

        let result = handle(&warehouse, base_query(Period::Day)).await;
        assert!(matches!(
            result,
            Err(CostEvolutionError::Warehouse(
                WarehouseError::TableNotFound(_)
            ))
        ));
    }
}
