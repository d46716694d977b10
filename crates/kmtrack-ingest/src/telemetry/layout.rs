//! Positional layout of the telemetry export
//!
//! The export format carries no header row worth trusting: a vehicle
//! block opens with a line whose first cell holds the registration
//! marker phrase and whose plate sits at a fixed later cell, and data
//! rows are identified by a date-shaped first cell. Columns are indexed
//! by position on purpose; do not convert this to a named-column schema.

/// Phrase in the first cell of a vehicle-identity header line.
pub const REGISTRATION_MARKER: &str = "Número de registro";

/// Cell holding the plate on a header line.
pub const HEADER_PLATE_CELL: usize = 2;

/// Date format of a data row's first cell.
pub const DATE_FORMAT: &str = "%d/%m/%Y";

// Data-row cells. Everything beyond the required minimum is optional;
// short rows simply lack the trailing columns.
pub const CELL_DATE: usize = 0;
pub const CELL_DRIVER: usize = 1;
pub const CELL_DURATION: usize = 4;
pub const CELL_DISTANCE: usize = 5;
pub const CELL_ODOMETER_START: usize = 6;
pub const CELL_ODOMETER_END: usize = 7;
pub const CELL_EXPECTED_DISTANCE: usize = 8;
pub const CELL_FIX_COST: usize = 9;
pub const CELL_VARIABLE_COST: usize = 10;
pub const CELL_IDLE: usize = 12;
