//! Connector boundary for regulatory-record ingestion.
//!
//! This module defines **only** the connector trait and its error type.
//! Connectors read their source, parse, and map rows to the canonical shape
//! with `entity_name_norm` pre-normalized and `raw_json` carrying the
//! unmodified original row. No database access, no hashing, no business
//! logic. Time-window enforcement in particular belongs to the engine; the
//! `hours` parameter is informational here.

use std::fmt;

use async_trait::async_trait;
use rgw_schemas::RegulatoryRecord;

mod csv_file;
mod jsonl_file;

pub use csv_file::CsvFileConnector;
pub use jsonl_file::JsonlFileConnector;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a connector implementation may return.
#[derive(Debug)]
pub enum ConnectorError {
    /// The source file could not be opened or read.
    Io { path: String, message: String },
    /// A row could not be decoded. `line` is 1-based and includes the header
    /// for CSV sources.
    Parse { line: usize, message: String },
    /// A required field is absent or empty.
    MissingField { line: usize, field: &'static str },
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::Io { path, message } => {
                write!(f, "connector i/o error reading '{path}': {message}")
            }
            ConnectorError::Parse { line, message } => {
                write!(f, "connector parse error at line {line}: {message}")
            }
            ConnectorError::MissingField { line, field } => {
                write!(f, "connector row at line {line} is missing field '{field}'")
            }
        }
    }
}

impl std::error::Error for ConnectorError {}

// ---------------------------------------------------------------------------
// Connector trait
// ---------------------------------------------------------------------------

/// Upstream source contract.
///
/// Implementations must be object-safe (`Box<dyn Connector>`) and
/// `Send + Sync` so the daemon can hold them across task boundaries.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable name identifying this connector (e.g. `"csv-file"`).
    fn name(&self) -> &'static str;

    /// The complete bulk dataset, in source order.
    async fn fetch_bulk(&self) -> Result<Vec<RegulatoryRecord>, ConnectorError>;

    /// The rolling recent feed. `hours` describes the window the caller
    /// intends to ingest; connectors may use it to scope their read but the
    /// engine enforces the actual cutoff.
    async fn fetch_recent(&self, hours: u32) -> Result<Vec<RegulatoryRecord>, ConnectorError>;
}
