//! The transactional ingestion run.
//!
//! One invocation = one database transaction: run row in, batched upserts
//! with per-record savepoints, fan-out per inserted/changed record, run row
//! finalized, commit. A poisoned record rolls back its own savepoint and is
//! counted; a gateway-fatal failure rolls back the whole run and the run row
//! is re-stamped best-effort outside the transaction.

use std::time::Instant;

use chrono::Utc;
use rgw_alerts::{fan_out, AlertAction};
use rgw_db::{classify, Db};
use rgw_schemas::{fingerprint, parse_published_at, CoreError, RegulatoryRecord, SourceType};
use serde::Serialize;
use sqlx::{Acquire, PgConnection};
use tracing::{debug, info, warn};

use crate::metrics::MetricsCell;
use crate::validate::{recent_window_filter, validate_batch};
use crate::ServiceMetrics;

// ---------------------------------------------------------------------------
// Options & outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub validate: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions {
            batch_size: 100,
            validate: true,
        }
    }
}

/// Counters returned by a completed run. A partial run is still a success:
/// `records_failed` is non-zero and the run row carries the summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub run_id: i64,
    pub source_type: SourceType,
    pub records_fetched: usize,
    pub records_inserted: usize,
    pub records_updated: usize,
    pub records_skipped: usize,
    pub records_failed: usize,
    /// Wall-clock duration of the run in milliseconds.
    #[serde(rename = "processingTime")]
    pub processing_ms: u64,
}

#[derive(Debug, Default)]
struct Tallies {
    inserted: usize,
    updated: usize,
    skipped: usize,
    failed: usize,
}

enum UpsertAction {
    Inserted,
    Updated,
    SkippedPrecedence,
    SkippedIdentical,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Explicit, injectable ingestion component: constructed once at startup and
/// passed down. Tests build their own with a test pool.
pub struct IngestEngine {
    db: Db,
    metrics: MetricsCell,
}

impl IngestEngine {
    pub fn new(db: Db) -> Self {
        IngestEngine {
            db,
            metrics: MetricsCell::default(),
        }
    }

    pub fn metrics(&self) -> ServiceMetrics {
        self.metrics.snapshot()
    }

    /// Ingest a batch of canonical records from one source.
    ///
    /// Preconditions (checked before any side effect): `records` non-empty,
    /// `batch_size ≥ 1`. For the recent feed, records older than the 72-hour
    /// window are dropped first; `records_fetched` counts the survivors.
    pub async fn ingest(
        &self,
        records: Vec<RegulatoryRecord>,
        source: SourceType,
        opts: IngestOptions,
    ) -> Result<IngestOutcome, CoreError> {
        if records.is_empty() {
            return Err(CoreError::validation(
                "records must be a non-empty sequence",
            ));
        }
        if opts.batch_size == 0 {
            return Err(CoreError::validation("batchSize must be at least 1"));
        }

        let records = match source {
            SourceType::Recent => recent_window_filter(records, Utc::now()),
            SourceType::Bulk => records,
        };
        if opts.validate {
            validate_batch(&records)?;
        }

        let fetched = records.len();
        let started = Instant::now();

        let mut txn = self.db.pool().begin().await.map_err(classify)?;

        let run_id: i64 = sqlx::query_scalar(
            "insert into ingestion_runs (source_type, started_at, records_fetched) \
             values ($1, now(), $2) returning id",
        )
        .bind(source.as_str())
        .bind(fetched as i32)
        .fetch_one(&mut *txn)
        .await
        .map_err(classify)?;

        let walked = walk_batches(&mut txn, &records, source, opts.batch_size).await;

        match walked {
            Ok(tallies) => {
                let error_summary = (tallies.failed > 0).then(|| {
                    format!("{} of {fetched} records failed; see logs for detail", tallies.failed)
                });
                sqlx::query(
                    "update ingestion_runs \
                     set finished_at = now(), records_inserted = $2, records_updated = $3, error = $4 \
                     where id = $1",
                )
                .bind(run_id)
                .bind(tallies.inserted as i32)
                .bind(tallies.updated as i32)
                .bind(&error_summary)
                .execute(&mut *txn)
                .await
                .map_err(classify)?;

                txn.commit().await.map_err(classify)?;

                let processing_ms = started.elapsed().as_millis() as u64;
                self.metrics.record_run(processing_ms, fetched, tallies.failed);

                info!(
                    run_id,
                    source = %source,
                    fetched,
                    inserted = tallies.inserted,
                    updated = tallies.updated,
                    skipped = tallies.skipped,
                    failed = tallies.failed,
                    processing_ms,
                    "ingestion run complete"
                );

                Ok(IngestOutcome {
                    run_id,
                    source_type: source,
                    records_fetched: fetched,
                    records_inserted: tallies.inserted,
                    records_updated: tallies.updated,
                    records_skipped: tallies.skipped,
                    records_failed: tallies.failed,
                    processing_ms,
                })
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(run_id, error = %rollback_err, "rollback after failed run also failed");
                }
                self.stamp_failed_run(run_id, source, fetched, &err).await;
                self.metrics.record_failure();
                Err(err)
            }
        }
    }

    /// Best-effort terminal stamp after a rolled-back run. The in-flight run
    /// row died with the transaction, so the update usually hits nothing; in
    /// that case a terminal failed-run row is written so the run is still
    /// audited. Either write may fail; then only the in-memory error
    /// counter moves.
    async fn stamp_failed_run(
        &self,
        run_id: i64,
        source: SourceType,
        fetched: usize,
        err: &CoreError,
    ) {
        let summary = format!("run aborted: {err}");

        let updated = sqlx::query(
            "update ingestion_runs set finished_at = now(), error = $2 where id = $1",
        )
        .bind(run_id)
        .bind(&summary)
        .execute(self.db.pool())
        .await;

        let insert_needed = match updated {
            Ok(done) => done.rows_affected() == 0,
            Err(stamp_err) => {
                warn!(run_id, error = %stamp_err, "failed-run stamp update failed");
                return;
            }
        };

        if insert_needed {
            let inserted = sqlx::query(
                "insert into ingestion_runs \
                 (source_type, started_at, finished_at, records_fetched, error) \
                 values ($1, now(), now(), $2, $3)",
            )
            .bind(source.as_str())
            .bind(fetched as i32)
            .bind(&summary)
            .execute(self.db.pool())
            .await;

            if let Err(stamp_err) = inserted {
                warn!(
                    run_id,
                    error = %stamp_err,
                    "failed-run audit insert failed; only in-memory counters reflect this run"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Batch walk
// ---------------------------------------------------------------------------

async fn walk_batches(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    records: &[RegulatoryRecord],
    source: SourceType,
    batch_size: usize,
) -> Result<Tallies, CoreError> {
    let mut tallies = Tallies::default();

    for (batch_index, batch) in records.chunks(batch_size).enumerate() {
        debug!(batch_index, len = batch.len(), "processing batch");

        for (offset, record) in batch.iter().enumerate() {
            let index = batch_index * batch_size + offset;

            // Savepoint per record: a poisoned row rolls back alone instead
            // of aborting the whole Postgres transaction.
            let mut savepoint = txn.begin().await.map_err(classify)?;

            match upsert_one(&mut savepoint, record, source).await {
                Ok(action) => {
                    savepoint.commit().await.map_err(classify)?;
                    match action {
                        UpsertAction::Inserted => tallies.inserted += 1,
                        UpsertAction::Updated => tallies.updated += 1,
                        UpsertAction::SkippedPrecedence | UpsertAction::SkippedIdentical => {
                            tallies.skipped += 1
                        }
                    }
                }
                Err(err) if is_transaction_fatal(&err) => return Err(err),
                Err(err) => {
                    savepoint.rollback().await.map_err(classify)?;
                    tallies.failed += 1;
                    warn!(
                        index,
                        source_key = %record.source_key,
                        error = %err,
                        "record failed; continuing with the rest of the run"
                    );
                }
            }
        }
    }

    Ok(tallies)
}

/// Whether a per-record failure poisons the whole run. Data faults (class
/// 22) and constraint violations (class 23) are row-local; storage faults
/// without a SQLSTATE are connection-level and abort the transaction.
/// Non-storage failures (e.g. an unparseable instant with validation off)
/// are always row-local.
fn is_transaction_fatal(err: &CoreError) -> bool {
    match err {
        CoreError::Storage { sqlstate, .. } => match sqlstate.as_deref() {
            Some(code) => !(code.starts_with("22") || code.starts_with("23")),
            None => true,
        },
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Upsert
// ---------------------------------------------------------------------------

async fn upsert_one(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    record: &RegulatoryRecord,
    source: SourceType,
) -> Result<UpsertAction, CoreError> {
    let hash = fingerprint(record);
    let published_at = parse_published_at(&record.published_at).ok_or_else(|| {
        CoreError::validation(format!(
            "record '{}' has unparseable published_at '{}'",
            record.source_key, record.published_at
        ))
    })?;

    let conn: &mut PgConnection = &mut *txn;

    let existing: Option<(i64, String, String)> = sqlx::query_as(
        "select id, content_hash, last_source_type from records where source_key = $1",
    )
    .bind(&record.source_key)
    .fetch_optional(&mut *conn)
    .await
    .map_err(classify)?;

    match existing {
        None => {
            let record_pk: i64 = sqlx::query_scalar(
                "insert into records \
                 (source_key, published_at, title, entity_name_raw, entity_name_norm, \
                  region, record_id, status, document_url, raw_json, content_hash, \
                  last_source_type) \
                 values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                 returning id",
            )
            .bind(&record.source_key)
            .bind(published_at)
            .bind(&record.title)
            .bind(&record.entity_name_raw)
            .bind(&record.entity_name_norm)
            .bind(&record.region)
            .bind(&record.record_id)
            .bind(&record.status)
            .bind(&record.document_url)
            .bind(&record.raw_json)
            .bind(&hash)
            .bind(source.as_str())
            .fetch_one(&mut *conn)
            .await
            .map_err(classify)?;

            fan_out(conn, record_pk, AlertAction::Insert).await?;
            Ok(UpsertAction::Inserted)
        }
        Some((record_pk, existing_hash, last_source_type)) => {
            // Bulk is the master of record; the short-window feed must not
            // clobber it.
            if source == SourceType::Recent && last_source_type == SourceType::Bulk.as_str() {
                debug!(source_key = %record.source_key, "bulk-owned row; recent upsert skipped");
                return Ok(UpsertAction::SkippedPrecedence);
            }

            if existing_hash == hash {
                return Ok(UpsertAction::SkippedIdentical);
            }

            sqlx::query(
                "update records set \
                 published_at = $2, title = $3, entity_name_raw = $4, \
                 entity_name_norm = $5, region = $6, record_id = $7, status = $8, \
                 document_url = $9, raw_json = $10, content_hash = $11, \
                 last_source_type = $12, updated_at = now() \
                 where id = $1",
            )
            .bind(record_pk)
            .bind(published_at)
            .bind(&record.title)
            .bind(&record.entity_name_raw)
            .bind(&record.entity_name_norm)
            .bind(&record.region)
            .bind(&record.record_id)
            .bind(&record.status)
            .bind(&record.document_url)
            .bind(&record.raw_json)
            .bind(&hash)
            .bind(source.as_str())
            .execute(&mut *conn)
            .await
            .map_err(classify)?;

            fan_out(conn, record_pk, AlertAction::Update).await?;
            Ok(UpsertAction::Updated)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let opts = IngestOptions::default();
        assert_eq!(opts.batch_size, 100);
        assert!(opts.validate);
    }

    #[test]
    fn constraint_and_data_faults_are_row_local() {
        let unique = CoreError::Storage {
            message: "duplicate key value violates unique constraint".to_string(),
            retryable: false,
            sqlstate: Some("23505".to_string()),
            source: None,
        };
        assert!(!is_transaction_fatal(&unique));

        let bad_value = CoreError::Storage {
            message: "value too long".to_string(),
            retryable: false,
            sqlstate: Some("22001".to_string()),
            source: None,
        };
        assert!(!is_transaction_fatal(&bad_value));
    }

    #[test]
    fn connection_level_faults_abort_the_run() {
        let io = CoreError::storage("connection reset by peer", true);
        assert!(is_transaction_fatal(&io));

        let deadlock = CoreError::Storage {
            message: "deadlock detected".to_string(),
            retryable: false,
            sqlstate: Some("40P01".to_string()),
            source: None,
        };
        assert!(is_transaction_fatal(&deadlock));
    }

    #[test]
    fn parse_failures_are_row_local() {
        let err = CoreError::validation("record 'X' has unparseable published_at 'nope'");
        assert!(!is_transaction_fatal(&err));
    }
}
