//! Calendar bucketing for cost aggregation
//!
//! [`Period::truncate`] is the one truncation rule in the system. Every
//! aggregation path buckets through it, so two queries over the same data
//! can never disagree on bucket boundaries.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Granularity for time-bucketed aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// Calendar day (midnight UTC).
    Day,
    /// ISO week, starting Monday.
    Week,
    /// Calendar month, starting on the 1st.
    Month,
}

impl Period {
    /// Truncate a timestamp to the start of its bucket, in UTC.
    pub fn truncate(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let start = match self {
            Period::Day => date,
            Period::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            Period::Month => date.with_day(1).unwrap_or(date),
        };
        Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN))
    }

    /// Human-readable label for a bucket start produced by [`truncate`].
    ///
    /// Day: `2024-03-10`, week: `2024-W11` (ISO week year), month: `2024-03`.
    ///
    /// [`truncate`]: Period::truncate
    pub fn label(&self, bucket_start: DateTime<Utc>) -> String {
        match self {
            Period::Day => bucket_start.format("%Y-%m-%d").to_string(),
            Period::Week => bucket_start.format("%G-W%V").to_string(),
            Period::Month => bucket_start.format("%Y-%m").to_string(),
        }
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" | "daily" => Ok(Period::Day),
            "week" | "weekly" => Ok(Period::Week),
            "month" | "monthly" => Ok(Period::Month),
            other => Err(format!("Invalid period: {other}")),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Day => write!(f, "day"),
            Period::Week => write!(f, "week"),
            Period::Month => write!(f, "month"),
        }
    }
}
