//! Parsing for exporter device stats documents.
//!
//! Collectors expose a tab-separated table with a header row; only the
//! exporter address, interface index, and current bit-rate columns are
//! consumed. Malformed rows are reported individually so the rest of a
//! document still yields samples.

use thiserror::Error;

/// Header names of the columns this system consumes.
pub const EXPORTER_COLUMN: &str = "Exporter Address";
pub const IFINDEX_COLUMN: &str = "Interface Index";
pub const BPS_COLUMN: &str = "Current NetFlow bps";

/// Errors produced while parsing a stats document.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("stats document is empty")]
    Empty,

    #[error("missing required column {name:?}")]
    MissingColumn { name: &'static str },

    #[error("line {line}: expected at least {expected} fields, found {found}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: empty exporter address")]
    EmptyExporter { line: usize },

    #[error("line {line}: invalid interface index {value:?}")]
    InvalidIfindex { line: usize, value: String },

    #[error("line {line}: invalid bps value {value:?}")]
    InvalidBps { line: usize, value: String },

    #[error("line {line}: negative bps value {value}")]
    NegativeBps { line: usize, value: f64 },
}

/// One well-formed row of the stats table.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatsRow {
    pub exporter: String,
    pub ifindex: u32,
    pub bps: f64,
}

/// A parsed document: usable rows plus per-row errors for the rest.
#[derive(Debug)]
pub struct StatsDocument {
    pub rows: Vec<DeviceStatsRow>,
    pub row_errors: Vec<ParseError>,
}

/// Field positions of the consumed columns within a row.
#[derive(Debug, Clone, Copy)]
struct Columns {
    exporter: usize,
    ifindex: usize,
    bps: usize,
    /// Minimum field count a row must have.
    width: usize,
}

fn parse_header(line: &str) -> Result<Columns, ParseError> {
    let mut exporter = None;
    let mut ifindex = None;
    let mut bps = None;

    for (idx, name) in line.split('\t').enumerate() {
        match name.trim() {
            EXPORTER_COLUMN => exporter = Some(idx),
            IFINDEX_COLUMN => ifindex = Some(idx),
            BPS_COLUMN => bps = Some(idx),
            _ => {}
        }
    }

    let exporter = exporter.ok_or(ParseError::MissingColumn {
        name: EXPORTER_COLUMN,
    })?;
    let ifindex = ifindex.ok_or(ParseError::MissingColumn {
        name: IFINDEX_COLUMN,
    })?;
    let bps = bps.ok_or(ParseError::MissingColumn { name: BPS_COLUMN })?;

    Ok(Columns {
        exporter,
        ifindex,
        bps,
        width: exporter.max(ifindex).max(bps) + 1,
    })
}

fn parse_row(columns: &Columns, line_no: usize, line: &str) -> Result<DeviceStatsRow, ParseError> {
    let fields: Vec<&str> = line.split('\t').collect();

    if fields.len() < columns.width {
        return Err(ParseError::FieldCount {
            line: line_no,
            expected: columns.width,
            found: fields.len(),
        });
    }

    let exporter = fields[columns.exporter].trim();
    if exporter.is_empty() {
        return Err(ParseError::EmptyExporter { line: line_no });
    }

    let ifindex_raw = fields[columns.ifindex].trim();
    let ifindex = ifindex_raw
        .parse::<u32>()
        .map_err(|_| ParseError::InvalidIfindex {
            line: line_no,
            value: ifindex_raw.to_string(),
        })?;

    let bps_raw = fields[columns.bps].trim();
    let bps = bps_raw.parse::<f64>().map_err(|_| ParseError::InvalidBps {
        line: line_no,
        value: bps_raw.to_string(),
    })?;

    if !bps.is_finite() {
        return Err(ParseError::InvalidBps {
            line: line_no,
            value: bps_raw.to_string(),
        });
    }

    if bps < 0.0 {
        return Err(ParseError::NegativeBps {
            line: line_no,
            value: bps,
        });
    }

    Ok(DeviceStatsRow {
        exporter: exporter.to_string(),
        ifindex,
        bps,
    })
}

/// Parses a full stats document.
///
/// A missing or malformed header rejects the document; malformed data
/// rows are collected in `row_errors` (with their line numbers) while
/// the remaining rows are still returned.
pub fn parse_stats(text: &str) -> Result<StatsDocument, ParseError> {
    let mut lines = text.lines().enumerate();

    let (_, header) = lines
        .by_ref()
        .find(|(_, l)| !l.trim().is_empty())
        .ok_or(ParseError::Empty)?;

    let columns = parse_header(header)?;

    let mut rows = Vec::new();
    let mut row_errors = Vec::new();

    for (idx, line) in lines {
        if line.trim().is_empty() {
            continue;
        }

        // Human-readable 1-based line numbers.
        match parse_row(&columns, idx + 1, line) {
            Ok(row) => rows.push(row),
            Err(e) => row_errors.push(e),
        }
    }

    Ok(StatsDocument { rows, row_errors })
}
