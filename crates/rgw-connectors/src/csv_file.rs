//! File-backed CSV connector, the usual shape of a regulator's bulk export.
//!
//! CSV format (headers case-insensitive; column order can vary):
//! `source_key,published_at,title,entity_name,region,record_id,status,document_url`
//!
//! `document_url` may be empty. `entity_name_norm` is computed here (the
//! producer owns normalization) and `raw_json` carries the row verbatim as
//! an object keyed by header.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;

use async_trait::async_trait;
use rgw_schemas::{normalize_entity_name, RegulatoryRecord};

use crate::{Connector, ConnectorError};

const REQUIRED_HEADERS: [&str; 7] = [
    "source_key",
    "published_at",
    "title",
    "entity_name",
    "region",
    "record_id",
    "status",
];

pub struct CsvFileConnector {
    path: PathBuf,
}

impl CsvFileConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvFileConnector { path: path.into() }
    }

    fn read_all(&self) -> Result<Vec<RegulatoryRecord>, ConnectorError> {
        let file = File::open(&self.path).map_err(|err| ConnectorError::Io {
            path: self.path.display().to_string(),
            message: err.to_string(),
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|err| ConnectorError::Parse {
                line: 1,
                message: format!("csv must have a header row: {err}"),
            })?
            .clone();
        let columns = HeaderMap::from_headers(&headers)?;

        let mut records = Vec::new();
        for (row_index, row) in reader.records().enumerate() {
            let line = row_index + 2; // 1-based, after the header
            let row = row.map_err(|err| ConnectorError::Parse {
                line,
                message: err.to_string(),
            })?;

            let get = |field: &'static str| -> Result<String, ConnectorError> {
                let value = columns.get(&row, line, field)?;
                if value.is_empty() {
                    return Err(ConnectorError::MissingField { line, field });
                }
                Ok(value.to_string())
            };

            let entity_name_raw = get("entity_name")?;
            let document_url = columns
                .get(&row, line, "document_url")
                .ok()
                .filter(|v| !v.is_empty())
                .map(str::to_string);

            // Retain the row verbatim as the opaque original payload.
            let mut original = serde_json::Map::new();
            for (header, value) in headers.iter().zip(row.iter()) {
                original.insert(header.to_string(), serde_json::Value::from(value));
            }

            records.push(RegulatoryRecord {
                source_key: get("source_key")?,
                published_at: get("published_at")?,
                title: get("title")?,
                entity_name_norm: normalize_entity_name(&entity_name_raw),
                entity_name_raw,
                region: get("region")?,
                record_id: get("record_id")?,
                status: get("status")?,
                document_url,
                raw_json: serde_json::Value::Object(original),
            });
        }

        Ok(records)
    }
}

#[async_trait]
impl Connector for CsvFileConnector {
    fn name(&self) -> &'static str {
        "csv-file"
    }

    async fn fetch_bulk(&self) -> Result<Vec<RegulatoryRecord>, ConnectorError> {
        self.read_all()
    }

    async fn fetch_recent(&self, _hours: u32) -> Result<Vec<RegulatoryRecord>, ConnectorError> {
        self.read_all()
    }
}

#[derive(Debug)]
struct HeaderMap {
    index: HashMap<String, usize>,
}

impl HeaderMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, ConnectorError> {
        let mut index = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            index.insert(header.trim().to_ascii_lowercase(), i);
        }

        for required in REQUIRED_HEADERS {
            if !index.contains_key(required) {
                return Err(ConnectorError::Parse {
                    line: 1,
                    message: format!("csv missing required header: {required}"),
                });
            }
        }

        Ok(HeaderMap { index })
    }

    fn get<'a>(
        &self,
        row: &'a csv::StringRecord,
        line: usize,
        field: &'static str,
    ) -> Result<&'a str, ConnectorError> {
        let i = *self
            .index
            .get(field)
            .ok_or(ConnectorError::MissingField { line, field })?;
        row.get(i).ok_or(ConnectorError::MissingField { line, field })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
