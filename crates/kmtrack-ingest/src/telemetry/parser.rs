//! Block parser for telemetry exports
//!
//! The file alternates vehicle-identity header lines and per-trip data
//! rows, with filler lines in between. Parsing is an explicit two-state
//! machine: [`classify`] tags each line and [`step`] is a pure function
//! of `(state, line)`, so transitions are testable without any I/O. A
//! single bad line never aborts the file; it is logged with its line
//! number and reason and parsing continues.

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::layout::{
    CELL_DATE, CELL_DISTANCE, CELL_DRIVER, CELL_DURATION, CELL_EXPECTED_DISTANCE, CELL_FIX_COST,
    CELL_IDLE, CELL_ODOMETER_END, CELL_ODOMETER_START, CELL_VARIABLE_COST, DATE_FORMAT,
    HEADER_PLATE_CELL, REGISTRATION_MARKER,
};
use super::models::{ParsedRecord, SkippedLine};

/// Classification of one raw line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// Vehicle-identity header (registration marker in the first cell).
    Header,
    /// Telemetry data row (date-shaped first cell).
    DataRow,
    /// Whitespace-only line.
    Blank,
    /// Anything else; layout filler, ignored.
    Unrecognized,
}

/// Tag a line by its first cell. Pure; does not validate the rest.
pub fn classify(cells: &[String]) -> LineClass {
    if cells.iter().all(|c| c.trim().is_empty()) {
        return LineClass::Blank;
    }
    let first = cells.first().map(|c| c.trim()).unwrap_or("");
    if first.starts_with(REGISTRATION_MARKER) {
        return LineClass::Header;
    }
    if NaiveDate::parse_from_str(first, DATE_FORMAT).is_ok() {
        return LineClass::DataRow;
    }
    LineClass::Unrecognized
}

/// Parser state: either scanning for a header, or inside the block of a
/// known vehicle. A block has no end marker; it closes when the next
/// header appears or at EOF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserState {
    SeekingVehicle,
    InVehicleBlock { plate: String },
}

/// Result of feeding one line to the state machine.
#[derive(Debug)]
pub struct StepOutcome {
    pub state: ParserState,
    pub record: Option<ParsedRecord>,
    pub skipped: Option<SkippedLine>,
}

impl StepOutcome {
    fn keep(state: ParserState) -> Self {
        Self {
            state,
            record: None,
            skipped: None,
        }
    }

    fn skip(state: ParserState, line_no: usize, reason: impl Into<String>) -> Self {
        Self {
            state,
            record: None,
            skipped: Some(SkippedLine {
                line_no,
                reason: reason.into(),
            }),
        }
    }
}

/// Advance the state machine by one classified line.
pub fn step(state: ParserState, line_no: usize, cells: &[String]) -> StepOutcome {
    match classify(cells) {
        LineClass::Blank | LineClass::Unrecognized => StepOutcome::keep(state),
        LineClass::Header => match extract_plate(cells) {
            Some(plate) => StepOutcome::keep(ParserState::InVehicleBlock { plate }),
            None => StepOutcome::skip(
                ParserState::SeekingVehicle,
                line_no,
                "header line without a plate",
            ),
        },
        LineClass::DataRow => match &state {
            ParserState::InVehicleBlock { plate } => match build_record(plate, line_no, cells) {
                Ok(record) => StepOutcome {
                    state,
                    record: Some(record),
                    skipped: None,
                },
                Err(reason) => StepOutcome::skip(state.clone(), line_no, reason),
            },
            ParserState::SeekingVehicle => StepOutcome::skip(
                state.clone(),
                line_no,
                "telemetry row before any vehicle header",
            ),
        },
    }
}

fn extract_plate(cells: &[String]) -> Option<String> {
    let plate = cells.get(HEADER_PLATE_CELL)?.trim();
    if plate.is_empty() {
        None
    } else {
        Some(plate.to_string())
    }
}

fn cell<'a>(cells: &'a [String], index: usize) -> Option<&'a str> {
    cells.get(index).map(|c| c.trim()).filter(|c| !c.is_empty())
}

fn raw_cell(cells: &[String], index: usize) -> Option<String> {
    cell(cells, index).map(|c| c.to_string())
}

/// Parse `HH:MM` (or a plain minute count) into minutes.
fn parse_duration_minutes(raw: &str) -> Option<i64> {
    if let Some((h, m)) = raw.split_once(':') {
        let hours: i64 = h.trim().parse().ok()?;
        let minutes: i64 = m.trim().parse().ok()?;
        if !(0..60).contains(&minutes) || hours < 0 {
            return None;
        }
        Some(hours * 60 + minutes)
    } else {
        raw.trim().parse().ok().filter(|m| *m >= 0)
    }
}

fn parse_distance(raw: &str) -> Option<f64> {
    raw.trim().replace(',', ".").parse().ok()
}

fn build_record(plate: &str, line_no: usize, cells: &[String]) -> Result<ParsedRecord, String> {
    let date_cell = cells
        .get(CELL_DATE)
        .map(|c| c.trim())
        .ok_or_else(|| "missing date cell".to_string())?;
    let date = NaiveDate::parse_from_str(date_cell, DATE_FORMAT)
        .map_err(|e| format!("unparseable date '{date_cell}': {e}"))?;

    let driver = raw_cell(cells, CELL_DRIVER);

    // Malformed durations degrade to zero, never to a dropped row.
    let duration_minutes = match cell(cells, CELL_DURATION) {
        Some(raw) => parse_duration_minutes(raw).unwrap_or_else(|| {
            warn!(line_no, raw, "Malformed duration, defaulting to 0");
            0
        }),
        None => 0,
    };

    let distance_km = match cell(cells, CELL_DISTANCE) {
        Some(raw) => parse_distance(raw).unwrap_or_else(|| {
            warn!(line_no, raw, "Malformed distance, defaulting to 0");
            0.0
        }),
        None => 0.0,
    };

    let idle_minutes = match cell(cells, CELL_IDLE) {
        Some(raw) => parse_duration_minutes(raw).unwrap_or_else(|| {
            warn!(line_no, raw, "Malformed idle time, defaulting to 0");
            0
        }),
        None => 0,
    };

    Ok(ParsedRecord {
        line_no,
        vehicle_plate: plate.to_string(),
        driver,
        date,
        duration_minutes,
        distance_km,
        idle_minutes,
        odometer_start: raw_cell(cells, CELL_ODOMETER_START),
        odometer_end: raw_cell(cells, CELL_ODOMETER_END),
        expected_distance: raw_cell(cells, CELL_EXPECTED_DISTANCE),
        fix_cost: raw_cell(cells, CELL_FIX_COST),
        variable_cost: raw_cell(cells, CELL_VARIABLE_COST),
    })
}

/// Decode raw file bytes, retrying as Latin-1 when UTF-8 fails.
///
/// Legacy exports arrive in a single-byte encoding; every byte maps to
/// the Unicode code point of the same value, which is exactly Latin-1.
pub fn decode_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!("Input is not valid UTF-8, falling back to Latin-1");
            bytes.iter().map(|&b| b as char).collect()
        },
    }
}

/// Output of parsing one file.
#[derive(Debug, Default)]
pub struct ParseOutput {
    pub records: Vec<ParsedRecord>,
    pub skipped: Vec<SkippedLine>,
    pub lines_read: usize,
}

/// Streaming parser over one telemetry export.
#[derive(Debug, Default)]
pub struct TelemetryParser;

impl TelemetryParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a whole file's bytes.
    pub fn parse(&self, bytes: &[u8]) -> ParseOutput {
        let text = decode_bytes(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut output = ParseOutput::default();
        let mut state = ParserState::SeekingVehicle;

        for (idx, result) in reader.records().enumerate() {
            let line_no = idx + 1;
            output.lines_read += 1;

            let cells: Vec<String> = match result {
                Ok(record) => record.iter().map(|c| c.to_string()).collect(),
                Err(e) => {
                    warn!(line_no, error = %e, "Unreadable line, skipping");
                    output.skipped.push(SkippedLine {
                        line_no,
                        reason: format!("unreadable line: {e}"),
                    });
                    continue;
                },
            };

            let outcome = step(state, line_no, &cells);
            state = outcome.state;
            if let Some(record) = outcome.record {
                output.records.push(record);
            }
            if let Some(skipped) = outcome.skipped {
                warn!(
                    line_no = skipped.line_no,
                    reason = %skipped.reason,
                    "Skipping line"
                );
                output.skipped.push(skipped);
            }
        }

        output
    }
}
