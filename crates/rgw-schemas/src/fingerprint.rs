//! Content fingerprint for change detection.
//!
//! The fingerprint is a SHA-256 hex digest over a canonical serialization of
//! the record's canonical fields. Canonical form: `key:value` pairs joined
//! with `|`, keys sorted lexicographically, UTF-8 bytes. A missing
//! `document_url` contributes the empty string, and `published_at` is hashed
//! exactly as received; producers own their serialization discipline.
//! `raw_json` never participates.

use sha2::{Digest, Sha256};

use crate::record::RegulatoryRecord;

/// Compute the 64-hex content fingerprint of a canonical record.
pub fn fingerprint(record: &RegulatoryRecord) -> String {
    let document_url = record.document_url.as_deref().unwrap_or("");

    let mut fields: [(&str, &str); 9] = [
        ("source_key", record.source_key.as_str()),
        ("published_at", record.published_at.as_str()),
        ("title", record.title.as_str()),
        ("entity_name_raw", record.entity_name_raw.as_str()),
        ("entity_name_norm", record.entity_name_norm.as_str()),
        ("region", record.region.as_str()),
        ("record_id", record.record_id.as_str()),
        ("status", record.status.as_str()),
        ("document_url", document_url),
    ];
    fields.sort_by_key(|(key, _)| *key);

    let canonical = fields
        .iter()
        .map(|(key, value)| format!("{key}:{value}"))
        .collect::<Vec<_>>()
        .join("|");

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
