//! Record transformer
//!
//! Turns parsed records into analysis-ready telemetry rows: drops empty
//! rows, collapses exact duplicates from accidental re-ingestion of the
//! same lines, coerces locale-variant decimals, and derives the odometer
//! delta and consolidated cost.

use std::collections::HashSet;
use std::sync::OnceLock;

use kmtrack_warehouse::models::TelemetryRow;
use regex::Regex;
use tracing::{debug, warn};

use crate::telemetry::models::ParsedRecord;

/// Result of transforming one parsed batch.
#[derive(Debug, Default)]
pub struct TransformOutput {
    pub rows: Vec<TelemetryRow>,
    pub duplicates_dropped: usize,
    pub empty_dropped: usize,
}

/// Canonicalize a column or field name: lowercase, runs of
/// non-alphanumerics collapsed to a single underscore.
pub fn normalize_field_name(name: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re =
        NON_ALNUM.get_or_init(|| Regex::new(r"[^0-9a-zA-Z]+").expect("static pattern is valid"));
    re.replace_all(name.trim(), "_")
        .trim_matches('_')
        .to_lowercase()
}

/// Parse a decimal tolerant of thousands/decimal separator variants:
/// `1.234,56`, `1,234.56`, `1234,56`, `1234.56` all coerce; failure
/// yields `None`, never an error.
pub fn coerce_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let has_comma = trimmed.contains(',');
    let has_dot = trimmed.contains('.');

    let normalized = match (has_comma, has_dot) {
        (true, true) => {
            // The rightmost separator is the decimal mark.
            let last_comma = trimmed.rfind(',').unwrap_or(0);
            let last_dot = trimmed.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                trimmed.replace('.', "").replace(',', ".")
            } else {
                trimmed.replace(',', "")
            }
        },
        (true, false) => trimmed.replace(',', "."),
        _ => trimmed.to_string(),
    };

    normalized.parse().ok()
}

fn is_empty_record(record: &ParsedRecord) -> bool {
    record.driver.is_none()
        && record.distance_km == 0.0
        && record.duration_minutes == 0
        && record.idle_minutes == 0
        && record.odometer_start.is_none()
        && record.odometer_end.is_none()
        && record.expected_distance.is_none()
        && record.fix_cost.is_none()
        && record.variable_cost.is_none()
}

// Natural key for exact-duplicate detection within one batch.
fn dedup_key(record: &ParsedRecord) -> (String, chrono::NaiveDate, Option<String>, u64) {
    (
        record.vehicle_plate.clone(),
        record.date,
        record.driver.clone(),
        record.distance_km.to_bits(),
    )
}

/// Transform a parsed batch into warehouse rows.
pub fn transform(records: Vec<ParsedRecord>) -> TransformOutput {
    let mut output = TransformOutput::default();
    let mut seen = HashSet::new();

    for record in records {
        if is_empty_record(&record) {
            debug!(line_no = record.line_no, "Dropping empty record");
            output.empty_dropped += 1;
            continue;
        }

        if !seen.insert(dedup_key(&record)) {
            debug!(
                line_no = record.line_no,
                plate = %record.vehicle_plate,
                "Dropping duplicate record"
            );
            output.duplicates_dropped += 1;
            continue;
        }

        let odometer_start = record.odometer_start.as_deref().and_then(coerce_decimal);
        let odometer_end = record.odometer_end.as_deref().and_then(coerce_decimal);

        // A negative delta means the odometer went backwards; that is
        // invalid data, not zero distance, so it stays missing for the
        // auditor to notice.
        let distance_delta = match (odometer_start, odometer_end) {
            (Some(start), Some(end)) => {
                let delta = end - start;
                if delta < 0.0 {
                    warn!(
                        line_no = record.line_no,
                        plate = %record.vehicle_plate,
                        delta,
                        "Negative odometer delta, treating as missing"
                    );
                    None
                } else {
                    Some(delta)
                }
            },
            _ => None,
        };

        let fix_cost = record.fix_cost.as_deref().and_then(coerce_decimal);
        let variable_cost = record.variable_cost.as_deref().and_then(coerce_decimal);
        let consolidated_cost = match (fix_cost, variable_cost) {
            (Some(fix), Some(variable)) => Some(fix + variable),
            _ => None,
        };

        output.rows.push(TelemetryRow {
            vehicle_plate: record.vehicle_plate,
            driver: record.driver.unwrap_or_default(),
            date: record.date,
            distance_km: record.distance_km,
            duration_minutes: record.duration_minutes,
            idle_minutes: record.idle_minutes,
            odometer_start,
            odometer_end,
            distance_delta,
            consolidated_cost,
            expected_distance: record.expected_distance.as_deref().and_then(coerce_decimal),
            divergent: None,
            score: None,
        });
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(plate: &str, driver: Option<&str>, distance: f64) -> ParsedRecord {
        ParsedRecord {
            line_no: 1,
            vehicle_plate: plate.to_string(),
            driver: driver.map(|d| d.to_string()),
            date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            duration_minutes: 60,
            distance_km: distance,
            idle_minutes: 0,
            odometer_start: None,
            odometer_end: None,
            expected_distance: None,
            fix_cost: None,
            variable_cost: None,
        }
    }

    #[test]
    fn test_normalize_field_name() {
        assert_eq!(normalize_field_name("Distância (km)"), "dist_ncia_km");
        assert_eq!(normalize_field_name("  Vehicle Plate "), "vehicle_plate");
        assert_eq!(normalize_field_name("driver"), "driver");
        assert_eq!(normalize_field_name("Odometer--End"), "odometer_end");
    }

    #[test]
    fn test_coerce_decimal_variants() {
        assert_eq!(coerce_decimal("1.234,56"), Some(1234.56));
        assert_eq!(coerce_decimal("1,234.56"), Some(1234.56));
        assert_eq!(coerce_decimal("1234,56"), Some(1234.56));
        assert_eq!(coerce_decimal("1234.56"), Some(1234.56));
        assert_eq!(coerce_decimal("42"), Some(42.0));
        assert_eq!(coerce_decimal(""), None);
        assert_eq!(coerce_decimal("abc"), None);
    }

    #[test]
    fn test_duplicates_collapse_to_one() {
        let records = vec![
            record("ABC1D23", Some("J. Silva"), 120.0),
            record("ABC1D23", Some("J. Silva"), 120.0),
            record("ABC1D23", Some("M. Costa"), 80.0),
        ];
        let output = transform(records);
        assert_eq!(output.rows.len(), 2);
        assert_eq!(output.duplicates_dropped, 1);
    }

    #[test]
    fn test_empty_records_are_dropped() {
        let mut empty = record("ABC1D23", None, 0.0);
        empty.duration_minutes = 0;
        let records = vec![empty, record("ABC1D23", Some("J. Silva"), 50.0)];
        let output = transform(records);
        assert_eq!(output.rows.len(), 1);
        assert_eq!(output.empty_dropped, 1);
    }

    #[test]
    fn test_distance_delta_derivation() {
        let mut rec = record("ABC1D23", Some("J. Silva"), 100.0);
        rec.odometer_start = Some("1.000,5".to_string());
        rec.odometer_end = Some("1.100,5".to_string());
        let output = transform(vec![rec]);
        let row = &output.rows[0];
        assert!((row.distance_delta.unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_delta_becomes_missing() {
        let mut rec = record("ABC1D23", Some("J. Silva"), 100.0);
        rec.odometer_start = Some("2000".to_string());
        rec.odometer_end = Some("1500".to_string());
        let output = transform(vec![rec]);
        let row = &output.rows[0];
        assert_eq!(row.distance_delta, None);
        // The readings themselves are kept.
        assert_eq!(row.odometer_start, Some(2000.0));
        assert_eq!(row.odometer_end, Some(1500.0));
    }

    #[test]
    fn test_consolidated_cost_requires_both_inputs() {
        let mut with_both = record("ABC1D23", Some("J. Silva"), 10.0);
        with_both.fix_cost = Some("100,5".to_string());
        with_both.variable_cost = Some("20".to_string());

        let mut missing_one = record("ABC1D23", Some("M. Costa"), 20.0);
        missing_one.fix_cost = Some("100".to_string());

        let output = transform(vec![with_both, missing_one]);
        assert_eq!(output.rows[0].consolidated_cost, Some(120.5));
        assert_eq!(output.rows[1].consolidated_cost, None);
    }

    #[test]
    fn test_unparseable_numeric_yields_missing() {
        let mut rec = record("ABC1D23", Some("J. Silva"), 10.0);
        rec.expected_distance = Some("n/a".to_string());
        let output = transform(vec![rec]);
        assert_eq!(output.rows[0].expected_distance, None);
    }
}
