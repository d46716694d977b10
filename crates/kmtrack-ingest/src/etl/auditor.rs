//! Divergence auditor
//!
//! Compares each row's captured distance against its expected distance
//! and assigns the binary compliance score: 100 compliant, 60 flagged.
//! Rows without an expected distance carry no signal and stay unscored.

use kmtrack_warehouse::models::TelemetryRow;
use tracing::info;

/// Relative error above which a row is divergent.
pub const DIVERGENCE_THRESHOLD: f64 = 0.10;
/// Score deducted for a divergent row.
pub const DIVERGENCE_PENALTY: i16 = 40;
/// Score of a compliant row.
pub const BASE_SCORE: i16 = 100;

/// Audited batch plus the rows destined for the inconsistency table.
#[derive(Debug, Default)]
pub struct AuditOutcome {
    pub rows: Vec<TelemetryRow>,
    pub divergent_rows: Vec<TelemetryRow>,
    pub inconsistency_count: usize,
}

fn is_divergent(captured: f64, expected: f64) -> bool {
    // A zero plan with real mileage is exactly the anomaly this audit
    // exists to surface.
    if expected == 0.0 {
        return captured != 0.0;
    }
    ((captured - expected) / expected).abs() > DIVERGENCE_THRESHOLD
}

/// Annotate a transformed batch with `divergent` and `score`.
pub fn audit(mut rows: Vec<TelemetryRow>) -> AuditOutcome {
    let mut divergent_rows = Vec::new();

    for row in &mut rows {
        let Some(expected) = row.expected_distance else {
            continue;
        };
        let divergent = is_divergent(row.distance_km, expected);
        row.divergent = Some(divergent);
        row.score = Some(if divergent {
            BASE_SCORE - DIVERGENCE_PENALTY
        } else {
            BASE_SCORE
        });
        if divergent {
            divergent_rows.push(row.clone());
        }
    }

    let inconsistency_count = divergent_rows.len();
    if inconsistency_count > 0 {
        info!(inconsistency_count, "Audit flagged divergent rows");
    }

    AuditOutcome {
        rows,
        divergent_rows,
        inconsistency_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(captured: f64, expected: Option<f64>) -> TelemetryRow {
        TelemetryRow {
            vehicle_plate: "ABC1D23".to_string(),
            driver: "J. Silva".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            distance_km: captured,
            duration_minutes: 60,
            idle_minutes: 0,
            odometer_start: None,
            odometer_end: None,
            distance_delta: None,
            consolidated_cost: None,
            expected_distance: expected,
            divergent: None,
            score: None,
        }
    }

    #[test]
    fn test_within_threshold_is_compliant() {
        let outcome = audit(vec![row(109.0, Some(100.0))]);
        assert_eq!(outcome.rows[0].divergent, Some(false));
        assert_eq!(outcome.rows[0].score, Some(100));
        assert_eq!(outcome.inconsistency_count, 0);
    }

    #[test]
    fn test_above_threshold_is_divergent() {
        let outcome = audit(vec![row(111.0, Some(100.0))]);
        assert_eq!(outcome.rows[0].divergent, Some(true));
        assert_eq!(outcome.rows[0].score, Some(60));
        assert_eq!(outcome.inconsistency_count, 1);
        assert_eq!(outcome.divergent_rows.len(), 1);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // Exactly 10% off is still compliant.
        let outcome = audit(vec![row(110.0, Some(100.0))]);
        assert_eq!(outcome.rows[0].divergent, Some(false));
    }

    #[test]
    fn test_undershoot_also_counts() {
        let outcome = audit(vec![row(80.0, Some(100.0))]);
        assert_eq!(outcome.rows[0].divergent, Some(true));
    }

    #[test]
    fn test_zero_expected_with_mileage_is_divergent() {
        let outcome = audit(vec![row(5.0, Some(0.0))]);
        assert_eq!(outcome.rows[0].divergent, Some(true));
        assert_eq!(outcome.rows[0].score, Some(60));
    }

    #[test]
    fn test_zero_expected_zero_captured_is_compliant() {
        let outcome = audit(vec![row(0.0, Some(0.0))]);
        assert_eq!(outcome.rows[0].divergent, Some(false));
        assert_eq!(outcome.rows[0].score, Some(100));
    }

    #[test]
    fn test_absent_expected_stays_unscored() {
        let outcome = audit(vec![row(50.0, None)]);
        assert_eq!(outcome.rows[0].divergent, None);
        assert_eq!(outcome.rows[0].score, None);
        assert_eq!(outcome.inconsistency_count, 0);
    }
}
