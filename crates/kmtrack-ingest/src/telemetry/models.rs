//! Parsed telemetry records

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One telemetry data row as emitted by the parser.
///
/// Numeric extras beyond the required minimum are kept as raw strings;
/// the transformer owns their coercion so a single tolerant decimal
/// parser covers every optional column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRecord {
    /// 1-based line number in the source file.
    pub line_no: usize,
    pub vehicle_plate: String,
    pub driver: Option<String>,
    pub date: NaiveDate,
    pub duration_minutes: i64,
    pub distance_km: f64,
    pub idle_minutes: i64,
    pub odometer_start: Option<String>,
    pub odometer_end: Option<String>,
    pub expected_distance: Option<String>,
    pub fix_cost: Option<String>,
    pub variable_cost: Option<String>,
}

/// A line the parser dropped, with the reason it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLine {
    pub line_no: usize,
    pub reason: String,
}
