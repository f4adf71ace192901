//! JSON-lines connector, the usual shape of a recent-feed dump: one JSON
//! object per line with the same field names the bulk export uses.
//!
//! The parsed object itself becomes `raw_json`, untouched.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use rgw_schemas::{normalize_entity_name, RegulatoryRecord};

use crate::{Connector, ConnectorError};

pub struct JsonlFileConnector {
    path: PathBuf,
}

impl JsonlFileConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonlFileConnector { path: path.into() }
    }

    fn read_all(&self) -> Result<Vec<RegulatoryRecord>, ConnectorError> {
        let contents = fs::read_to_string(&self.path).map_err(|err| ConnectorError::Io {
            path: self.path.display().to_string(),
            message: err.to_string(),
        })?;

        let mut records = Vec::new();
        for (line_index, line) in contents.lines().enumerate() {
            let line_no = line_index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let value: serde_json::Value =
                serde_json::from_str(trimmed).map_err(|err| ConnectorError::Parse {
                    line: line_no,
                    message: err.to_string(),
                })?;

            let entity_name_raw = str_field(&value, line_no, "entity_name")?;
            records.push(RegulatoryRecord {
                source_key: str_field(&value, line_no, "source_key")?,
                published_at: str_field(&value, line_no, "published_at")?,
                title: str_field(&value, line_no, "title")?,
                entity_name_norm: normalize_entity_name(&entity_name_raw),
                entity_name_raw,
                region: str_field(&value, line_no, "region")?,
                record_id: str_field(&value, line_no, "record_id")?,
                status: str_field(&value, line_no, "status")?,
                document_url: value
                    .get("document_url")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                raw_json: value,
            });
        }

        Ok(records)
    }
}

fn str_field(
    value: &serde_json::Value,
    line: usize,
    field: &'static str,
) -> Result<String, ConnectorError> {
    match value.get(field).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(ConnectorError::MissingField { line, field }),
    }
}

#[async_trait]
impl Connector for JsonlFileConnector {
    fn name(&self) -> &'static str {
        "jsonl-file"
    }

    async fn fetch_bulk(&self) -> Result<Vec<RegulatoryRecord>, ConnectorError> {
        self.read_all()
    }

    async fn fetch_recent(&self, _hours: u32) -> Result<Vec<RegulatoryRecord>, ConnectorError> {
        self.read_all()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write fixture");
        file
    }

    #[tokio::test]
    async fn parses_lines_and_keeps_raw_json_verbatim() {
        let fixture = write_fixture(
            r#"{"source_key":"TX-001","published_at":"2024-01-10T00:00Z","title":"Notice","entity_name":" Acme Energy LLC ","region":"TX","record_id":"R1","status":"open","document_url":"u","extra_vendor_field":42}
{"source_key":"CA-002","published_at":"2024-01-11T00:00Z","title":"Filing","entity_name":"Beta Corp","region":"CA","record_id":"R2","status":"closed"}
"#,
        );

        let connector = JsonlFileConnector::new(fixture.path());
        let records = connector.fetch_recent(72).await.unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.entity_name_norm, "acme energy llc");
        // Unknown vendor fields survive untouched in the opaque payload.
        assert_eq!(first.raw_json["extra_vendor_field"], 42);

        assert_eq!(records[1].document_url, None);
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let fixture = write_fixture(
            "\n{\"source_key\":\"K\",\"published_at\":\"2024-01-10T00:00Z\",\"title\":\"T\",\"entity_name\":\"E\",\"region\":\"TX\",\"record_id\":\"R\",\"status\":\"open\"}\n\n",
        );
        let connector = JsonlFileConnector::new(fixture.path());
        assert_eq!(connector.fetch_bulk().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn broken_json_names_the_line() {
        let fixture = write_fixture("{\"source_key\":\n");
        let connector = JsonlFileConnector::new(fixture.path());
        let err = connector.fetch_bulk().await.unwrap_err();
        assert!(matches!(err, ConnectorError::Parse { line: 1, .. }), "got: {err}");
    }

    #[tokio::test]
    async fn missing_field_is_reported() {
        let fixture = write_fixture(r#"{"source_key":"K","title":"T"}"#);
        let connector = JsonlFileConnector::new(fixture.path());
        let err = connector.fetch_bulk().await.unwrap_err();
        assert!(err.to_string().contains("published_at"));
    }
}
