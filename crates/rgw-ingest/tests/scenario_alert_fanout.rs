//! Alert fan-out driven through the engine: matching rules get one log row
//! per inserted or content-changed record, written atomically with the
//! upsert; unset filters act as wildcards.
//!
//! DB-backed; skipped if RGW_DATABASE_URL is not set.

use anyhow::Result;
use chrono::{Duration, Utc};
use rgw_alerts::{AlertStore, NewAlertRule};
use rgw_ingest::{IngestEngine, IngestOptions};
use rgw_schemas::{normalize_entity_name, RegulatoryRecord, SourceType};

async fn test_db() -> Result<Option<rgw_db::Db>> {
    if std::env::var(rgw_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: RGW_DATABASE_URL not set");
        return Ok(None);
    }
    Ok(Some(rgw_db::testkit_db_pool().await?))
}

/// Recreate the test user from scratch; the cascade clears old rules and
/// their logs.
async fn fresh_user(db: &rgw_db::Db, email: &str, plan: &str) -> Result<i64> {
    sqlx::query("delete from users where email = $1")
        .bind(email)
        .execute(db.pool())
        .await?;
    let id: i64 = sqlx::query_scalar("insert into users (email, plan) values ($1, $2) returning id")
        .bind(email)
        .bind(plan)
        .fetch_one(db.pool())
        .await?;
    Ok(id)
}

async fn cleanup_records(db: &rgw_db::Db, prefix: &str) -> Result<()> {
    sqlx::query("delete from records where source_key like $1")
        .bind(format!("{prefix}%"))
        .execute(db.pool())
        .await?;
    Ok(())
}

fn record(source_key: &str, entity: &str, region: &str, title: &str) -> RegulatoryRecord {
    RegulatoryRecord {
        source_key: source_key.to_string(),
        published_at: (Utc::now() - Duration::hours(10)).to_rfc3339(),
        title: title.to_string(),
        entity_name_raw: entity.to_string(),
        entity_name_norm: normalize_entity_name(entity),
        region: region.to_string(),
        record_id: "R1".to_string(),
        status: "open".to_string(),
        document_url: None,
        raw_json: serde_json::json!({}),
    }
}

async fn log_count(db: &rgw_db::Db, source_key: &str, action: &str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "select count(*) from alert_logs al \
         join records r on r.id = al.record_id \
         where r.source_key = $1 and al.action_type = $2",
    )
    .bind(source_key)
    .bind(action)
    .fetch_one(db.pool())
    .await?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Scenario — both rules of a pro user trigger on one insert
// ---------------------------------------------------------------------------

#[tokio::test]
async fn insert_triggers_every_matching_rule_atomically() -> Result<()> {
    let Some(db) = test_db().await? else { return Ok(()) };
    cleanup_records(&db, "FAN1-").await?;

    let user_id = fresh_user(&db, "fanout-pro@example.test", "pro").await?;
    let alerts = AlertStore::new(db.clone());
    alerts
        .create_rule(NewAlertRule {
            user_id,
            entity_name_norm: None,
            region: Some("TX".to_string()),
        })
        .await?;
    alerts
        .create_rule(NewAlertRule {
            user_id,
            entity_name_norm: Some("acme energy llc".to_string()),
            region: None,
        })
        .await?;

    let engine = IngestEngine::new(db.clone());
    let outcome = engine
        .ingest(
            vec![record("FAN1-TX-001", "Acme Energy LLC", "TX", "Notice")],
            SourceType::Bulk,
            IngestOptions::default(),
        )
        .await?;
    assert_eq!(outcome.records_inserted, 1);

    assert_eq!(log_count(&db, "FAN1-TX-001", "insert").await?, 2);
    assert_eq!(log_count(&db, "FAN1-TX-001", "update").await?, 0);

    // A content change fans out again, now as updates.
    let changed = record("FAN1-TX-001", "Acme Energy LLC", "TX", "Notice amended");
    let outcome = engine
        .ingest(vec![changed], SourceType::Bulk, IngestOptions::default())
        .await?;
    assert_eq!(outcome.records_updated, 1);
    assert_eq!(log_count(&db, "FAN1-TX-001", "update").await?, 2);

    // An identical replay is a skip and must not fan out.
    let replay = record("FAN1-TX-001", "Acme Energy LLC", "TX", "Notice amended");
    let outcome = engine
        .ingest(vec![replay], SourceType::Bulk, IngestOptions::default())
        .await?;
    assert_eq!(outcome.records_skipped, 1);
    assert_eq!(log_count(&db, "FAN1-TX-001", "update").await?, 2);

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario — unset filters are wildcards
// ---------------------------------------------------------------------------

#[tokio::test]
async fn region_only_rule_triggers_on_any_entity_in_that_region() -> Result<()> {
    let Some(db) = test_db().await? else { return Ok(()) };
    cleanup_records(&db, "FAN2-").await?;

    let user_id = fresh_user(&db, "fanout-wildcard@example.test", "pro").await?;
    let alerts = AlertStore::new(db.clone());
    alerts
        .create_rule(NewAlertRule {
            user_id,
            entity_name_norm: None,
            region: Some("TX".to_string()),
        })
        .await?;

    let engine = IngestEngine::new(db.clone());
    engine
        .ingest(
            vec![
                record("FAN2-TX-001", "Totally Unrelated Corp", "TX", "Notice"),
                record("FAN2-CA-001", "Totally Unrelated Corp", "CA", "Notice"),
            ],
            SourceType::Bulk,
            IngestOptions::default(),
        )
        .await?;

    assert_eq!(
        log_count(&db, "FAN2-TX-001", "insert").await?,
        1,
        "null entity filter is a wildcard within the region"
    );
    assert_eq!(
        log_count(&db, "FAN2-CA-001", "insert").await?,
        0,
        "the region filter still binds"
    );

    Ok(())
}
