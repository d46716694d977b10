//! Travel summary query
//!
//! Single-point (non-bucketed) totals over the same filter contract as
//! the evolution query. Both queries price travels through the same cost
//! rule and share the degraded fetch, so their figures always agree.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::client::{TravelFilter, Warehouse, WarehouseError};
use crate::features::dashboard::queries::cost_evolution::{
    fetch_rows_degradable, DEFAULT_RANGE_DAYS,
};
use crate::query::{BindValue, Column, Predicate};

/// Query for aggregate travel totals over a range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelSummaryQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
}

/// Aggregate totals for the filtered travels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelSummaryResponse {
    pub travel_count: u64,
    pub total_distance_km: f64,
    pub fix_cost: f64,
    pub variable_cost: f64,
    pub total_cost: f64,
    pub avg_cost: f64,
    /// True when billing data was unavailable and costs are zeroed.
    pub degraded: bool,
}

/// Errors that can occur when computing the travel summary
#[derive(Debug, thiserror::Error)]
pub enum TravelSummaryError {
    /// Start must precede end
    #[error("Start of range must precede its end")]
    InvalidRange,
    /// A warehouse error occurred
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),
}

impl TravelSummaryQuery {
    /// Validates the query parameters
    pub fn validate(&self) -> Result<(), TravelSummaryError> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start >= end {
                return Err(TravelSummaryError::InvalidRange);
            }
        }
        Ok(())
    }

    fn filter(&self, now: DateTime<Utc>) -> TravelFilter {
        let end = self.end.unwrap_or(now);
        let start = self
            .start
            .unwrap_or_else(|| end - Duration::days(DEFAULT_RANGE_DAYS));
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

/// Handles the travel summary query
#[tracing::instrument(skip(warehouse))]
pub async fn handle<W: Warehouse + ?Sized>(
    warehouse: &W,
    query: TravelSummaryQuery,
) -> Result<TravelSummaryResponse, TravelSummaryError> {
    query.validate()?;

    let filter = query.filter(Utc::now());
    let (rows, degraded) = fetch_rows_degradable(warehouse, &filter).await?;

    let mut response = TravelSummaryResponse {
        travel_count: 0,
        total_distance_km: 0.0,
        fix_cost: 0.0,
        variable_cost: 0.0,
        total_cost: 0.0,
        avg_cost: 0.0,
        degraded,
    };

    for row in &rows {
        response.travel_count += 1;
        response.total_distance_km += row.full_distance;
        response.fix_cost += row.fix_portion();
        response.variable_cost += row.variable_portion();
        response.total_cost += row.cost();
    }
    if response.travel_count > 0 {
        response.avg_cost = response.total_cost / response.travel_count as f64;
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::dashboard::queries::cost_evolution::{self, CostEvolutionQuery};
    use crate::models::TravelCostRow;
    use crate::period::Period;
    use crate::query::Table;
    use crate::testing::MemoryWarehouse;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    fn seed(warehouse: &MemoryWarehouse) {
        let bills = [
            (3u32, 120.0, Some((30.0, 1.5))),
            (3, 45.0, Some((10.0, 0.8))),
            (9, 200.0, None),
            (17, 60.0, Some((25.0, 2.0))),
            (24, 310.0, Some((0.0, 1.1))),
        ];
        for (d, distance, bill) in bills {
            warehouse.seed_travel_cost(TravelCostRow {
                travel_id: Uuid::new_v4(),
                datetime: day(d, 9),
                full_distance: distance,
                unit_id: None,
                fix_cost: bill.map(|(f, _): (f64, f64)| f),
                variable_km: bill.map(|(_, v)| v),
            });
        }
    }

    #[test]
    fn test_validation_rejects_inverted_range() {
        let query = TravelSummaryQuery {
            start: Some(day(10, 0)),
            end: Some(day(5, 0)),
            unit_id: None,
        };
        assert!(matches!(
            query.validate(),
            Err(TravelSummaryError::InvalidRange)
        ));
    }

    #[tokio::test]
    async fn test_summary_totals() {
        let warehouse = MemoryWarehouse::new();
        seed(&warehouse);

        let response = handle(
            &warehouse,
            TravelSummaryQuery {
                start: Some(day(1, 0)),
                end: Some(day(28, 0)),
                unit_id: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(response.travel_count, 5);
        assert!((response.total_distance_km - 735.0).abs() < 1e-9);
        assert!(!response.degraded);
        assert!(
            (response.fix_cost + response.variable_cost - response.total_cost).abs() < 1e-9
        );
    }

    #[tokio::test]
    async fn test_bucket_totals_conserve_summary_total() {
        let warehouse = MemoryWarehouse::new();
        seed(&warehouse);

        let summary = handle(
            &warehouse,
            TravelSummaryQuery {
                start: Some(day(1, 0)),
                end: Some(day(28, 0)),
                unit_id: None,
            },
        )
        .await
        .unwrap();

        let evolution = cost_evolution::handle(
            &warehouse,
            CostEvolutionQuery {
                period: Period::Week,
                start: Some(day(1, 0)),
                end: Some(day(28, 0)),
                unit_id: None,
                limit: Some(100),
            },
        )
        .await
        .unwrap();

        let bucketed_total: f64 = evolution.buckets.iter().map(|b| b.total_cost).sum();
        let bucketed_distance: f64 = evolution.buckets.iter().map(|b| b.total_distance_km).sum();
        let bucketed_count: u64 = evolution.buckets.iter().map(|b| b.travel_count).sum();

        assert!((bucketed_total - summary.total_cost).abs() < 1e-9);
        assert!((bucketed_distance - summary.total_distance_km).abs() < 1e-9);
        assert_eq!(bucketed_count, summary.travel_count);
    }

    #[tokio::test]
    async fn test_summary_degrades_without_bills_table() {
        let warehouse = MemoryWarehouse::new();
        warehouse.drop_table(Table::Bills);
        warehouse.seed_travel(crate::models::TravelRow {
            travel_id: Uuid::new_v4(),
            datetime: day(10, 9),
            full_distance: 42.0,
            unit_id: None,
        });

        let response = handle(
            &warehouse,
            TravelSummaryQuery {
                start: Some(day(1, 0)),
                end: Some(day(28, 0)),
                unit_id: None,
            },
        )
        .await
        .unwrap();

        assert!(response.degraded);
        assert_eq!(response.travel_count, 1);
        assert!((response.total_distance_km - 42.0).abs() < 1e-9);
        assert_eq!(response.total_cost, 0.0);
    }

    #[tokio::test]
    async fn test_empty_range_yields_zeroes() {
        let warehouse = MemoryWarehouse::new();

        let response = handle(
            &warehouse,
            TravelSummaryQuery {
                start: Some(day(1, 0)),
                end: Some(day(2, 0)),
                unit_id: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(response.travel_count, 0);
        assert_eq!(response.avg_cost, 0.0);
    }
}
