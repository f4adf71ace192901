//! The canonical regulatory record produced by connectors and consumed by
//! the ingestion engine.
//!
//! This module defines **only** the data contract and its small helpers.
//! No database logic, no hashing (that is `fingerprint.rs`), and no
//! validation policy (the engine owns that) belong here.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Source type
// ---------------------------------------------------------------------------

/// Which feed a record (or an ingestion run) came from.
///
/// `Bulk` is the master of record; `Recent` is the rolling short-window feed
/// and must never overwrite a row last written by `Bulk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Bulk,
    Recent,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Bulk => "bulk",
            SourceType::Recent => "recent",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bulk" => Ok(SourceType::Bulk),
            "recent" => Ok(SourceType::Recent),
            other => Err(crate::CoreError::validation(format!(
                "source type must be 'bulk' or 'recent', got '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical record
// ---------------------------------------------------------------------------

/// A regulatory record in canonical shape.
///
/// `published_at` is kept as the string the producer emitted: the content
/// fingerprint hashes it verbatim, so the engine never reformats it. It must
/// still parse as an instant (see [`parse_published_at`]) before it can be
/// persisted.
///
/// `raw_json` carries the unmodified original row and never participates in
/// change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryRecord {
    /// Unique external identifier (≤255 chars).
    pub source_key: String,
    /// Publication instant exactly as received from the producer.
    pub published_at: String,
    pub title: String,
    /// Entity name exactly as it appears at the source (≤255 chars).
    pub entity_name_raw: String,
    /// `lowercase(trim(entity_name_raw))`; producers compute it.
    pub entity_name_norm: String,
    /// Two-letter uppercase region code.
    pub region: String,
    /// External record id at the source.
    pub record_id: String,
    pub status: String,
    pub document_url: Option<String>,
    /// Opaque original payload, retained verbatim.
    pub raw_json: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Canonical entity-name normalization: outer-whitespace trim + lowercase.
///
/// Deliberately nothing more: no diacritic folding, no punctuation or
/// suffix stripping. Matching downstream is exact-after-lowercase.
pub fn normalize_entity_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Parse a producer-supplied publication instant.
///
/// Accepts RFC 3339 and the minute-precision UTC form some feeds emit
/// (`2024-01-10T00:00Z`). Returns the instant in UTC.
pub fn parse_published_at(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::<FixedOffset>::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%MZ") {
        return Some(naive.and_utc());
    }
    None
}

/// True when `s` is a two-letter uppercase ASCII region code.
pub fn is_valid_region(s: &str) -> bool {
    s.len() == 2 && s.bytes().all(|b| b.is_ascii_uppercase())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
