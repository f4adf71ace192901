//! Per-record failure isolation: with validation on, a malformed record
//! aborts the run before any write; with validation off, a row that dies on
//! a database constraint is counted and the rest of the batch still lands.
//!
//! DB-backed; skipped if RGW_DATABASE_URL is not set.

use anyhow::Result;
use chrono::{Duration, Utc};
use rgw_ingest::{IngestEngine, IngestOptions};
use rgw_schemas::{normalize_entity_name, RegulatoryRecord, SourceType};

async fn test_db() -> Result<Option<rgw_db::Db>> {
    if std::env::var(rgw_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: RGW_DATABASE_URL not set");
        return Ok(None);
    }
    Ok(Some(rgw_db::testkit_db_pool().await?))
}

async fn cleanup(db: &rgw_db::Db, prefix: &str) -> Result<()> {
    sqlx::query("delete from records where source_key like $1")
        .bind(format!("{prefix}%"))
        .execute(db.pool())
        .await?;
    Ok(())
}

fn record(source_key: &str, region: &str) -> RegulatoryRecord {
    let entity = "Acme Energy LLC";
    RegulatoryRecord {
        source_key: source_key.to_string(),
        published_at: (Utc::now() - Duration::hours(10)).to_rfc3339(),
        title: "Notice".to_string(),
        entity_name_raw: entity.to_string(),
        entity_name_norm: normalize_entity_name(entity),
        region: region.to_string(),
        record_id: "R1".to_string(),
        status: "open".to_string(),
        document_url: None,
        raw_json: serde_json::json!({}),
    }
}

// ---------------------------------------------------------------------------
// Validation on: abort before any write
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_region_with_validation_aborts_before_any_write() -> Result<()> {
    let Some(db) = test_db().await? else { return Ok(()) };
    cleanup(&db, "ISO1-").await?;

    let (runs_before,): (i64,) = sqlx::query_as("select count(*) from ingestion_runs")
        .fetch_one(db.pool())
        .await?;

    let engine = IngestEngine::new(db.clone());
    let batch = vec![
        record("ISO1-TX-001", "TX"),
        record("ISO1-TX-002", "tx"), // lowercase, invalid
        record("ISO1-TX-003", "TX"),
    ];

    let err = engine
        .ingest(batch, SourceType::Bulk, IngestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(err.to_string().contains("record 1"), "got: {err}");

    let (count,): (i64,) =
        sqlx::query_as("select count(*) from records where source_key like 'ISO1-%'")
            .fetch_one(db.pool())
            .await?;
    assert_eq!(count, 0, "validation gate must fire before any write");

    let (runs_after,): (i64,) = sqlx::query_as("select count(*) from ingestion_runs")
        .fetch_one(db.pool())
        .await?;
    assert_eq!(runs_before, runs_after);

    Ok(())
}

// ---------------------------------------------------------------------------
// Validation off: the poisoned row fails alone
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lowercase_region_violates_the_check_constraint_and_fails_alone() -> Result<()> {
    let Some(db) = test_db().await? else { return Ok(()) };
    cleanup(&db, "ISO2-").await?;

    let engine = IngestEngine::new(db.clone());
    // The middle row carries region "tx": it fits varchar(2) but violates
    // the uppercase check constraint on records.region at upsert time.
    let batch = vec![
        record("ISO2-TX-001", "TX"),
        record("ISO2-TX-002", "tx"),
        record("ISO2-TX-003", "TX"),
    ];

    let outcome = engine
        .ingest(
            batch,
            SourceType::Bulk,
            IngestOptions { batch_size: 100, validate: false },
        )
        .await?;

    assert_eq!(outcome.records_fetched, 3);
    assert_eq!(outcome.records_inserted, 2);
    assert_eq!(outcome.records_failed, 1);
    assert_eq!(
        outcome.records_fetched,
        outcome.records_inserted
            + outcome.records_updated
            + outcome.records_skipped
            + outcome.records_failed
    );

    // The first and third rows committed despite the poisoned middle row.
    let (count,): (i64,) = sqlx::query_as(
        "select count(*) from records where source_key in ('ISO2-TX-001', 'ISO2-TX-003')",
    )
    .fetch_one(db.pool())
    .await?;
    assert_eq!(count, 2);

    let (poisoned,): (i64,) =
        sqlx::query_as("select count(*) from records where source_key = 'ISO2-TX-002'")
            .fetch_one(db.pool())
            .await?;
    assert_eq!(poisoned, 0, "the lowercase region must never commit");

    // The run row records the failure summary.
    let (error,): (Option<String>,) =
        sqlx::query_as("select error from ingestion_runs where id = $1")
            .bind(outcome.run_id)
            .fetch_one(db.pool())
            .await?;
    let error = error.expect("partial run must carry an error summary");
    assert!(error.contains("1 of 3"), "got: {error}");

    Ok(())
}

#[tokio::test]
async fn oversized_region_blows_the_length_bound_and_fails_alone() -> Result<()> {
    let Some(db) = test_db().await? else { return Ok(()) };
    cleanup(&db, "ISO4-").await?;

    let engine = IngestEngine::new(db.clone());
    // Same isolation property through the other rejection path: "TEXAS"
    // overflows the varchar(2) column before the check constraint is even
    // consulted.
    let outcome = engine
        .ingest(
            vec![record("ISO4-TX-001", "TX"), record("ISO4-TX-002", "TEXAS")],
            SourceType::Bulk,
            IngestOptions { batch_size: 100, validate: false },
        )
        .await?;

    assert_eq!(outcome.records_fetched, 2);
    assert_eq!(outcome.records_inserted, 1);
    assert_eq!(outcome.records_failed, 1);

    let (count,): (i64,) =
        sqlx::query_as("select count(*) from records where source_key = 'ISO4-TX-001'")
            .fetch_one(db.pool())
            .await?;
    assert_eq!(count, 1);

    Ok(())
}

// ---------------------------------------------------------------------------
// Unparseable instant with validation off is also row-local
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unparseable_instant_without_validation_fails_only_its_row() -> Result<()> {
    let Some(db) = test_db().await? else { return Ok(()) };
    cleanup(&db, "ISO3-").await?;

    let engine = IngestEngine::new(db.clone());
    let mut broken = record("ISO3-TX-002", "TX");
    broken.published_at = "not-an-instant".to_string();

    let outcome = engine
        .ingest(
            vec![record("ISO3-TX-001", "TX"), broken],
            SourceType::Bulk,
            IngestOptions { batch_size: 100, validate: false },
        )
        .await?;

    assert_eq!(outcome.records_inserted, 1);
    assert_eq!(outcome.records_failed, 1);

    Ok(())
}
