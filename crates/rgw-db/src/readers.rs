//! Paginated readers behind the operational endpoints: ingestion-run
//! history, the alert log, and the record listing/export surface.
//!
//! Every reader returns `{rows, pagination}` where `total` is a `COUNT(*)`
//! under the same filter, and every query goes through the gateway's retry
//! wrapper (these are standalone reads, never transactional).

use chrono::{DateTime, Utc};
use rgw_schemas::CoreError;
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};

use crate::Db;

/// Hard ceiling on a single page.
const MAX_PAGE_LIMIT: i64 = 100;
const DEFAULT_PAGE_LIMIT: i64 = 20;
/// Ceiling on a CSV export sweep.
const MAX_EXPORT_ROWS: i64 = 10_000;

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    /// Clamp caller-supplied paging: limit into `1..=100` (default 20),
    /// offset to `>= 0`.
    pub fn clamped(limit: Option<i64>, offset: Option<i64>) -> Self {
        Page {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub rows: Vec<T>,
    pub pagination: Pagination,
}

// ---------------------------------------------------------------------------
// Row shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRunRow {
    pub id: i64,
    pub source_type: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub records_fetched: i32,
    pub records_inserted: i32,
    pub records_updated: i32,
    pub error: Option<String>,
}

/// Alert-log row joined to its rule (for `user_id`) and record (for the
/// display fields).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AlertLogRow {
    pub id: i64,
    pub alert_rule_id: i64,
    pub record_id: i64,
    pub user_id: i64,
    pub action_type: String,
    pub triggered_at: DateTime<Utc>,
    pub source_key: String,
    pub title: String,
    pub entity_name_norm: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecordRow {
    pub id: i64,
    pub source_key: String,
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub entity_name_raw: String,
    pub entity_name_norm: String,
    pub region: String,
    pub record_id: String,
    pub status: String,
    pub document_url: Option<String>,
    pub raw_json: serde_json::Value,
    pub content_hash: String,
    pub last_source_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AlertLogFilter {
    pub alert_rule_id: Option<i64>,
    pub user_id: Option<i64>,
    pub action_type: Option<String>,
}

impl AlertLogFilter {
    fn validate(&self) -> Result<(), CoreError> {
        if let Some(action) = &self.action_type {
            if action != "insert" && action != "update" {
                return Err(CoreError::validation(format!(
                    "actionType must be 'insert' or 'update', got '{action}'"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub entity_name_norm: Option<String>,
    pub region: Option<String>,
}

fn push_alert_log_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &AlertLogFilter) {
    qb.push(" where 1 = 1");
    if let Some(rule_id) = filter.alert_rule_id {
        qb.push(" and al.alert_rule_id = ").push_bind(rule_id);
    }
    if let Some(user_id) = filter.user_id {
        qb.push(" and ar.user_id = ").push_bind(user_id);
    }
    if let Some(action) = &filter.action_type {
        qb.push(" and al.action_type = ").push_bind(action.clone());
    }
}

fn push_record_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &RecordFilter) {
    qb.push(" where 1 = 1");
    if let Some(norm) = &filter.entity_name_norm {
        qb.push(" and entity_name_norm = ").push_bind(norm.clone());
    }
    if let Some(region) = &filter.region {
        qb.push(" and region = ").push_bind(region.clone());
    }
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

/// Ingestion runs, newest first.
pub async fn ingestion_run_history(
    db: &Db,
    page: Page,
) -> Result<Paginated<IngestionRunRow>, CoreError> {
    const COUNT_SQL: &str = "select count(*) from ingestion_runs";
    const SELECT_SQL: &str = "\
        select id, source_type, started_at, finished_at, \
               records_fetched, records_inserted, records_updated, error \
        from ingestion_runs \
        order by started_at desc \
        limit $1 offset $2";

    let pool = db.pool().clone();
    let total: i64 = db
        .with_retry(COUNT_SQL, move || {
            let pool = pool.clone();
            async move { sqlx::query_scalar(COUNT_SQL).fetch_one(&pool).await }
        })
        .await?;

    let pool = db.pool().clone();
    let rows = db
        .with_retry(SELECT_SQL, move || {
            let pool = pool.clone();
            async move {
                sqlx::query_as::<_, IngestionRunRow>(SELECT_SQL)
                    .bind(page.limit)
                    .bind(page.offset)
                    .fetch_all(&pool)
                    .await
            }
        })
        .await?;

    Ok(Paginated {
        rows,
        pagination: Pagination {
            limit: page.limit,
            offset: page.offset,
            total,
        },
    })
}

/// Alert-log events, newest first, optionally filtered by rule, user, or
/// action type.
pub async fn alert_log_history(
    db: &Db,
    filter: &AlertLogFilter,
    page: Page,
) -> Result<Paginated<AlertLogRow>, CoreError> {
    filter.validate()?;

    let pool = db.pool().clone();
    let total: i64 = db
        .with_retry("count alert_logs", move || {
            let pool = pool.clone();
            async move {
                let mut qb = QueryBuilder::new(
                    "select count(*) from alert_logs al \
                     join alert_rules ar on ar.id = al.alert_rule_id",
                );
                push_alert_log_filters(&mut qb, filter);
                qb.build_query_scalar().fetch_one(&pool).await
            }
        })
        .await?;

    let pool = db.pool().clone();
    let rows = db
        .with_retry("select alert_logs", move || {
            let pool = pool.clone();
            async move {
                let mut qb = QueryBuilder::new(
                    "select al.id, al.alert_rule_id, al.record_id, ar.user_id, \
                            al.action_type, al.triggered_at, \
                            r.source_key, r.title, r.entity_name_norm, r.region \
                     from alert_logs al \
                     join alert_rules ar on ar.id = al.alert_rule_id \
                     join records r on r.id = al.record_id",
                );
                push_alert_log_filters(&mut qb, filter);
                qb.push(" order by al.triggered_at desc limit ")
                    .push_bind(page.limit)
                    .push(" offset ")
                    .push_bind(page.offset);
                qb.build_query_as::<AlertLogRow>().fetch_all(&pool).await
            }
        })
        .await?;

    Ok(Paginated {
        rows,
        pagination: Pagination {
            limit: page.limit,
            offset: page.offset,
            total,
        },
    })
}

/// Records, newest publication first, optionally filtered by normalized
/// entity name or region.
pub async fn record_page(
    db: &Db,
    filter: &RecordFilter,
    page: Page,
) -> Result<Paginated<RecordRow>, CoreError> {
    let pool = db.pool().clone();
    let total: i64 = db
        .with_retry("count records", move || {
            let pool = pool.clone();
            async move {
                let mut qb = QueryBuilder::new("select count(*) from records");
                push_record_filters(&mut qb, filter);
                qb.build_query_scalar().fetch_one(&pool).await
            }
        })
        .await?;

    let pool = db.pool().clone();
    let rows = db
        .with_retry("select records", move || {
            let pool = pool.clone();
            async move {
                let mut qb = QueryBuilder::new(
                    "select id, source_key, published_at, title, entity_name_raw, \
                            entity_name_norm, region, record_id, status, document_url, \
                            raw_json, content_hash, last_source_type, created_at, updated_at \
                     from records",
                );
                push_record_filters(&mut qb, filter);
                qb.push(" order by published_at desc limit ")
                    .push_bind(page.limit)
                    .push(" offset ")
                    .push_bind(page.offset);
                qb.build_query_as::<RecordRow>().fetch_all(&pool).await
            }
        })
        .await?;

    Ok(Paginated {
        rows,
        pagination: Pagination {
            limit: page.limit,
            offset: page.offset,
            total,
        },
    })
}

/// Flat record sweep for CSV export, capped at 10,000 rows.
pub async fn records_for_export(
    db: &Db,
    filter: &RecordFilter,
    limit: Option<i64>,
) -> Result<Vec<RecordRow>, CoreError> {
    let limit = limit.unwrap_or(1000).clamp(1, MAX_EXPORT_ROWS);

    let pool = db.pool().clone();
    db.with_retry("select records for export", move || {
        let pool = pool.clone();
        async move {
            let mut qb = QueryBuilder::new(
                "select id, source_key, published_at, title, entity_name_raw, \
                        entity_name_norm, region, record_id, status, document_url, \
                        raw_json, content_hash, last_source_type, created_at, updated_at \
                 from records",
            );
            push_record_filters(&mut qb, filter);
            qb.push(" order by published_at desc limit ").push_bind(limit);
            qb.build_query_as::<RecordRow>().fetch_all(&pool).await
        }
    })
    .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
