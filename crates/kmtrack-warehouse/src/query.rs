//! Allow-listed query building
//!
//! Identifiers are never interpolated from caller input: table and column
//! names come from closed enums, and every value travels as a bound
//! parameter. The renderer produces a `WHERE` fragment with `$n`
//! placeholders numbered in bind order.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Warehouse tables this crate is allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Vehicles,
    Travels,
    Stops,
    Bills,
    Telemetry,
    Inconsistencies,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Vehicles => "vehicles",
            Table::Travels => "travels",
            Table::Stops => "stops",
            Table::Bills => "bills",
            Table::Telemetry => "telemetry",
            Table::Inconsistencies => "telemetry_inconsistencies",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Columns usable in predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Datetime,
    TravelId,
    VehicleId,
    UnitId,
    Plate,
    Date,
    Driver,
}

impl Column {
    pub fn name(&self) -> &'static str {
        match self {
            Column::Datetime => "datetime",
            Column::TravelId => "travel_id",
            Column::VehicleId => "vehicle_id",
            Column::UnitId => "unit_id",
            Column::Plate => "plate",
            Column::Date => "date",
            Column::Driver => "driver",
        }
    }
}

/// A value bound into a rendered query.
#[derive(Debug, Clone)]
pub enum BindValue {
    Timestamp(DateTime<Utc>),
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

/// A single filter condition.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// `column >= start AND column < end` (half-open range).
    DateRange {
        column: Column,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// `column = value`.
    Equals { column: Column, value: BindValue },
    /// `column IS NULL`.
    IsNull { column: Column },
}

/// A rendered `WHERE` fragment with its binds in placeholder order.
#[derive(Debug, Clone)]
pub struct WhereClause {
    /// Either empty or starts with `" WHERE "`.
    pub sql: String,
    pub binds: Vec<BindValue>,
}

/// Render predicates to a `WHERE` fragment, numbering placeholders from
/// `first_placeholder` upwards.
pub fn render_where(predicates: &[Predicate], first_placeholder: usize) -> WhereClause {
    if predicates.is_empty() {
        return WhereClause {
            sql: String::new(),
            binds: Vec::new(),
        };
    }

    let mut parts = Vec::with_capacity(predicates.len());
    let mut binds = Vec::new();
    let mut n = first_placeholder;

    for predicate in predicates {
        match predicate {
            Predicate::DateRange { column, start, end } => {
                parts.push(format!(
                    "{col} >= ${a} AND {col} < ${b}",
                    col = column.name(),
                    a = n,
                    b = n + 1
                ));
                binds.push(BindValue::Timestamp(*start));
                binds.push(BindValue::Timestamp(*end));
                n += 2;
            },
            Predicate::Equals { column, value } => {
                parts.push(format!("{} = ${}", column.name(), n));
                binds.push(value.clone());
                n += 1;
            },
            Predicate::IsNull { column } => {
                parts.push(format!("{} IS NULL", column.name()));
            },
        }
    }

    WhereClause {
        sql: format!(" WHERE {}", parts.join(" AND ")),
        binds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_empty_predicates_render_nothing() {
        let clause = render_where(&[], 1);
        assert_eq!(clause.sql, "");
        assert!(clause.binds.is_empty());
    }

    #[test]
    fn test_date_range_renders_half_open_interval() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let clause = render_where(
            &[Predicate::DateRange {
                column: Column::Datetime,
                start,
                end,
            }],
            1,
        );
        assert_eq!(clause.sql, " WHERE datetime >= $1 AND datetime < $2");
        assert_eq!(clause.binds.len(), 2);
    }

    #[test]
    fn test_placeholder_numbering_continues_across_predicates() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let clause = render_where(
            &[
                Predicate::DateRange {
                    column: Column::Datetime,
                    start,
                    end,
                },
                Predicate::Equals {
                    column: Column::UnitId,
                    value: BindValue::Text("unit-7".to_string()),
                },
            ],
            1,
        );
        assert_eq!(
            clause.sql,
            " WHERE datetime >= $1 AND datetime < $2 AND unit_id = $3"
        );
        assert_eq!(clause.binds.len(), 3);
    }

    #[test]
    fn test_is_null_consumes_no_placeholder() {
        let clause = render_where(
            &[
                Predicate::IsNull {
                    column: Column::UnitId,
                },
                Predicate::Equals {
                    column: Column::Driver,
                    value: BindValue::Text("A. Silva".to_string()),
                },
            ],
            1,
        );
        assert_eq!(clause.sql, " WHERE unit_id IS NULL AND driver = $1");
        assert_eq!(clause.binds.len(), 1);
    }

    #[test]
    fn test_first_placeholder_offset() {
        let clause = render_where(
            &[Predicate::Equals {
                column: Column::Plate,
                value: BindValue::Text("ABC1D23".to_string()),
            }],
            4,
        );
        assert_eq!(clause.sql, " WHERE plate = $4");
    }

    #[test]
    fn test_table_names() {
        assert_eq!(Table::Telemetry.name(), "telemetry");
        assert_eq!(Table::Inconsistencies.name(), "telemetry_inconsistencies");
    }
}
