//! Pre-write gating: the recent-window time filter and record validation.
//!
//! Both run before any database work. Validation failure names the first
//! offending record by index with every per-field reason concatenated, so an
//! operator can fix the feed without replaying the batch blind.

use chrono::{DateTime, Duration, Utc};
use rgw_schemas::{is_valid_region, parse_published_at, CoreError, RegulatoryRecord};

/// The recent feed covers a rolling 72-hour window; older records (and
/// records whose instant does not parse) are dropped before processing.
pub const RECENT_WINDOW_HOURS: i64 = 72;

/// Drop records outside `now − 72h`. Bulk ingestion never calls this.
pub fn recent_window_filter(
    records: Vec<RegulatoryRecord>,
    now: DateTime<Utc>,
) -> Vec<RegulatoryRecord> {
    let cutoff = now - Duration::hours(RECENT_WINDOW_HOURS);
    records
        .into_iter()
        .filter(|record| {
            parse_published_at(&record.published_at).is_some_and(|published| published >= cutoff)
        })
        .collect()
}

/// Per-field violations for one record; empty means valid.
pub fn record_violations(record: &RegulatoryRecord) -> Vec<String> {
    let mut violations = Vec::new();

    let required: [(&str, &str); 8] = [
        ("source_key", &record.source_key),
        ("published_at", &record.published_at),
        ("title", &record.title),
        ("entity_name_raw", &record.entity_name_raw),
        ("entity_name_norm", &record.entity_name_norm),
        ("region", &record.region),
        ("record_id", &record.record_id),
        ("status", &record.status),
    ];
    for (field, value) in required {
        if value.is_empty() {
            violations.push(format!("{field}: required"));
        }
    }

    if record.source_key.len() > 255 {
        violations.push("source_key: must be at most 255 characters".to_string());
    }
    if !record.published_at.is_empty() && parse_published_at(&record.published_at).is_none() {
        violations.push(format!(
            "published_at: not a parseable instant ('{}')",
            record.published_at
        ));
    }
    if !record.region.is_empty() && !is_valid_region(&record.region) {
        violations.push(format!(
            "region: must match ^[A-Z]{{2}}$ ('{}')",
            record.region
        ));
    }

    violations
}

/// Validate a whole batch; the first failing record aborts with its index
/// and concatenated reasons, before any database write.
pub fn validate_batch(records: &[RegulatoryRecord]) -> Result<(), CoreError> {
    for (index, record) in records.iter().enumerate() {
        let violations = record_violations(record);
        if !violations.is_empty() {
            return Err(CoreError::validation(format!(
                "record {index} failed validation: {}",
                violations.join("; ")
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source_key: &str, published_at: &str, region: &str) -> RegulatoryRecord {
        RegulatoryRecord {
            source_key: source_key.to_string(),
            published_at: published_at.to_string(),
            title: "Notice".to_string(),
            entity_name_raw: "Acme Energy LLC".to_string(),
            entity_name_norm: "acme energy llc".to_string(),
            region: region.to_string(),
            record_id: "R1".to_string(),
            status: "open".to_string(),
            document_url: None,
            raw_json: serde_json::json!({}),
        }
    }

    #[test]
    fn valid_record_has_no_violations() {
        assert!(record_violations(&record("TX-001", "2024-01-10T00:00Z", "TX")).is_empty());
    }

    #[test]
    fn violations_name_the_fields() {
        let mut r = record("TX-001", "not-a-date", "tx");
        r.title = String::new();
        let v = record_violations(&r);
        assert!(v.iter().any(|m| m.starts_with("title: required")));
        assert!(v.iter().any(|m| m.starts_with("published_at:")));
        assert!(v.iter().any(|m| m.starts_with("region:")));
    }

    #[test]
    fn overlong_source_key_is_rejected() {
        let long = "K".repeat(256);
        let v = record_violations(&record(&long, "2024-01-10T00:00Z", "TX"));
        assert!(v.iter().any(|m| m.contains("255")));
    }

    #[test]
    fn batch_error_names_the_index_and_all_reasons() {
        let records = vec![
            record("TX-001", "2024-01-10T00:00Z", "TX"),
            record("TX-002", "2024-01-10T00:00Z", "tx"),
        ];
        let err = validate_batch(&records).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("record 1"), "message was: {msg}");
        assert!(msg.contains("region"), "message was: {msg}");
    }

    #[test]
    fn recent_filter_drops_old_and_unparseable() {
        let now = "2024-01-10T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let fresh = record("A", "2024-01-09T14:00:00Z", "TX"); // now − 10h
        let stale = record("B", "2024-01-05T20:00:00Z", "TX"); // now − 100h
        let broken = record("C", "whenever", "TX");

        let kept = recent_window_filter(vec![fresh, stale, broken], now);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source_key, "A");
    }

    #[test]
    fn recent_filter_keeps_the_window_edge() {
        let now = "2024-01-10T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let edge = record("E", "2024-01-07T00:00:00Z", "TX"); // exactly now − 72h
        let kept = recent_window_filter(vec![edge], now);
        assert_eq!(kept.len(), 1);
    }
}
