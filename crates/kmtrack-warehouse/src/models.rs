//! Typed rows for the analytical warehouse
//!
//! Every computation path that prices a travel goes through [`total_cost`];
//! there is deliberately no second place where the formula lives.

use chrono::{DateTime, NaiveDate, Utc};
use kmtrack_common::KmError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered vehicle, keyed by its license plate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub plate: String,
    pub created_at: DateTime<Utc>,
}

/// A travel (trip) taken by a vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Travel {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub datetime: DateTime<Utc>,
    /// Total distance driven over the travel, in kilometers.
    pub full_distance: f64,
    /// Operational unit the travel belongs to, when assigned.
    pub unit_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Travel {
    /// Check the row invariants: the travel cannot start in the future
    /// and cannot cover a negative distance.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), KmError> {
        if self.datetime > now {
            return Err(KmError::Validation(format!(
                "travel {}: datetime is in the future",
                self.id
            )));
        }
        if self.full_distance < 0.0 {
            return Err(KmError::Validation(format!(
                "travel {}: negative full_distance",
                self.id
            )));
        }
        Ok(())
    }
}

/// One leg of a travel: departure from the previous point and arrival
/// at a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub id: Uuid,
    pub travel_id: Uuid,
    pub site: String,
    pub departure_datetime: DateTime<Utc>,
    pub arrival_datetime: DateTime<Utc>,
    /// Distance covered on this leg, in kilometers.
    pub trip_distance: f64,
}

impl Stop {
    /// Check the leg invariants: chronological endpoints and a
    /// non-negative leg distance.
    pub fn validate(&self) -> Result<(), KmError> {
        if self.arrival_datetime < self.departure_datetime {
            return Err(KmError::Validation(format!(
                "stop {}: arrival precedes departure",
                self.id
            )));
        }
        if self.trip_distance < 0.0 {
            return Err(KmError::Validation(format!(
                "stop {}: negative trip_distance",
                self.id
            )));
        }
        Ok(())
    }
}

/// The billing record attached to a travel.
///
/// A travel has at most one bill; travels without one are priced at zero
/// by the aggregation queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    pub id: Uuid,
    pub travel_id: Uuid,
    /// Fixed cost component, independent of distance.
    pub fix_cost: f64,
    /// Variable cost per kilometer.
    pub variable_km: f64,
}

impl Bill {
    /// Cost of this bill applied to a travel of `full_distance` kilometers.
    pub fn cost_for(&self, full_distance: f64) -> f64 {
        total_cost(self.fix_cost, self.variable_km, full_distance)
    }

    /// Check that both cost components are non-negative.
    pub fn validate(&self) -> Result<(), KmError> {
        if self.fix_cost < 0.0 || self.variable_km < 0.0 {
            return Err(KmError::Validation(format!(
                "bill {}: negative cost component",
                self.id
            )));
        }
        Ok(())
    }
}

/// The single costing rule: fixed component plus per-kilometer rate
/// applied to the travel's full distance.
pub fn total_cost(fix_cost: f64, variable_km: f64, full_distance: f64) -> f64 {
    fix_cost + variable_km * full_distance
}

/// One transformed telemetry record, ready for warehouse load.
///
/// Optional fields stay `None` when the source export did not carry the
/// column or the value could not be derived (e.g. a negative odometer
/// delta). Audit fields (`divergent`, `score`) are `None` until the
/// auditor has run, and stay `None` for rows it cannot score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRow {
    pub vehicle_plate: String,
    pub driver: String,
    pub date: NaiveDate,
    pub distance_km: f64,
    pub duration_minutes: i64,
    pub idle_minutes: i64,
    pub odometer_start: Option<f64>,
    pub odometer_end: Option<f64>,
    /// Odometer delta; `None` when the reading went backwards.
    pub distance_delta: Option<f64>,
    pub consolidated_cost: Option<f64>,
    pub expected_distance: Option<f64>,
    pub divergent: Option<bool>,
    pub score: Option<i16>,
}

/// A travel joined with its (optional) bill, as fetched for aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelCostRow {
    pub travel_id: Uuid,
    pub datetime: DateTime<Utc>,
    pub full_distance: f64,
    pub unit_id: Option<String>,
    pub fix_cost: Option<f64>,
    pub variable_km: Option<f64>,
}

impl TravelCostRow {
    /// Cost of this travel; zero when no bill is attached.
    pub fn cost(&self) -> f64 {
        match (self.fix_cost, self.variable_km) {
            (Some(fix), Some(rate)) => total_cost(fix, rate, self.full_distance),
            _ => 0.0,
        }
    }

    /// Fixed portion of the cost, zero without a bill.
    pub fn fix_portion(&self) -> f64 {
        self.fix_cost.unwrap_or(0.0)
    }

    /// Variable portion of the cost, zero without a bill.
    pub fn variable_portion(&self) -> f64 {
        self.variable_km.unwrap_or(0.0) * self.full_distance
    }
}

/// A bare travel row, used by the degraded aggregation path when billing
/// data is unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelRow {
    pub travel_id: Uuid,
    pub datetime: DateTime<Utc>,
    pub full_distance: f64,
    pub unit_id: Option<String>,
}
