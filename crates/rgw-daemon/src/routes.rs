//! Axum router and all HTTP handlers.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` and thin: they map
//! requests onto core operations and map [`CoreError`] onto statuses.
//! Nothing else lives here.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};

use rgw_alerts::NewAlertRule;
use rgw_connectors::{Connector, CsvFileConnector, JsonlFileConnector};
use rgw_db::{
    alert_log_history, ingestion_run_history, record_page, records_for_export, AlertLogFilter,
    Page, RecordFilter, RecordRow,
};
use rgw_ingest::{IngestOptions, IngestOutcome, RECENT_WINDOW_HOURS};
use rgw_schemas::{CoreError, RegulatoryRecord, SourceType};

use crate::api_types::{
    AlertLogQuery, CreateAlertRequest, DeleteAlertRequest, ExportQuery, HealthResponse,
    IngestRequest, MetricsResponse, PageQuery, RecordsQuery, UserAlertsResponse,
};
use crate::error::ApiError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/metrics", get(metrics))
        .route("/api/ingest/bulk", post(ingest_bulk))
        .route("/api/ingest/recent", post(ingest_recent))
        .route("/api/alerts", post(create_alert))
        .route("/api/alerts/:id", delete(delete_alert))
        .route("/api/alerts/user/:user_id", get(user_alerts))
        .route("/api/alerts/user/:user_id/stats", get(user_alert_stats))
        .route("/api/alerts/logs", get(alert_logs))
        .route("/api/ingestion/history", get(ingestion_history))
        .route("/api/records", get(records))
        .route("/api/export/csv", get(export_csv))
        .with_state(state)
}

fn fail(state: &AppState, error: CoreError) -> ApiError {
    ApiError {
        error,
        expose_detail: state.dev_mode,
    }
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> Response {
    let database = st.db.health_check().await;
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            ok: database,
            database,
            service: st.build.service,
            version: st.build.version,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /api/metrics
// ---------------------------------------------------------------------------

pub(crate) async fn metrics(State(st): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        ingestion: st.engine.metrics(),
        pool: st.db.stats(),
    })
}

// ---------------------------------------------------------------------------
// POST /api/ingest/{bulk,recent}
// ---------------------------------------------------------------------------

pub(crate) async fn ingest_bulk(
    State(st): State<Arc<AppState>>,
    body: Option<Json<IngestRequest>>,
) -> Result<Json<IngestOutcome>, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let records = fetch_records(&st, SourceType::Bulk, req.hours)
        .await
        .map_err(|e| fail(&st, e))?;
    let outcome = st
        .engine
        .ingest(records, SourceType::Bulk, options_from(&req))
        .await
        .map_err(|e| fail(&st, e))?;
    Ok(Json(outcome))
}

pub(crate) async fn ingest_recent(
    State(st): State<Arc<AppState>>,
    body: Option<Json<IngestRequest>>,
) -> Result<Json<IngestOutcome>, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let records = fetch_records(&st, SourceType::Recent, req.hours)
        .await
        .map_err(|e| fail(&st, e))?;
    let outcome = st
        .engine
        .ingest(records, SourceType::Recent, options_from(&req))
        .await
        .map_err(|e| fail(&st, e))?;
    Ok(Json(outcome))
}

fn options_from(req: &IngestRequest) -> IngestOptions {
    let defaults = IngestOptions::default();
    IngestOptions {
        batch_size: req.batch_size.unwrap_or(defaults.batch_size),
        validate: req.validate.unwrap_or(defaults.validate),
    }
}

async fn fetch_records(
    st: &AppState,
    source: SourceType,
    hours: Option<u32>,
) -> Result<Vec<RegulatoryRecord>, CoreError> {
    let (path, env_name) = match source {
        SourceType::Bulk => (st.connectors.bulk.as_ref(), "CONNECTOR_BULK_PATH"),
        SourceType::Recent => (st.connectors.recent.as_ref(), "CONNECTOR_RECENT_PATH"),
    };
    let Some(path) = path else {
        return Err(CoreError::validation(format!(
            "no {source} connector configured; set {env_name}"
        )));
    };

    let connector = connector_for(path);
    let fetched = match source {
        SourceType::Bulk => connector.fetch_bulk().await,
        SourceType::Recent => {
            connector
                .fetch_recent(hours.unwrap_or(RECENT_WINDOW_HOURS as u32))
                .await
        }
    };

    fetched.map_err(|err| {
        CoreError::storage(
            format!("connector '{}' failed: {err}", connector.name()),
            false,
        )
    })
}

/// Pick the file connector by extension: JSON-lines dumps for the recent
/// feed, CSV for everything else.
fn connector_for(path: &FsPath) -> Box<dyn Connector> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("jsonl") | Some("json") | Some("ndjson") => {
            Box::new(JsonlFileConnector::new(path.to_path_buf()))
        }
        _ => Box::new(CsvFileConnector::new(path.to_path_buf())),
    }
}

// ---------------------------------------------------------------------------
// Alert rules
// ---------------------------------------------------------------------------

pub(crate) async fn create_alert(
    State(st): State<Arc<AppState>>,
    Json(req): Json<CreateAlertRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = st
        .alerts
        .create_rule(NewAlertRule {
            user_id: req.user_id,
            entity_name_norm: req.entity_name_norm,
            region: req.region,
        })
        .await
        .map_err(|e| fail(&st, e))?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn delete_alert(
    State(st): State<Arc<AppState>>,
    Path(rule_id): Path<i64>,
    Json(req): Json<DeleteAlertRequest>,
) -> Result<StatusCode, ApiError> {
    st.alerts
        .delete_rule(rule_id, req.user_id)
        .await
        .map_err(|e| fail(&st, e))?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn user_alerts(
    State(st): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<UserAlertsResponse>, ApiError> {
    let rules = st
        .alerts
        .user_rules(user_id)
        .await
        .map_err(|e| fail(&st, e))?;
    Ok(Json(UserAlertsResponse { user_id, rules }))
}

pub(crate) async fn user_alert_stats(
    State(st): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = st
        .alerts
        .user_rule_stats(user_id)
        .await
        .map_err(|e| fail(&st, e))?;
    Ok(Json(stats))
}

// ---------------------------------------------------------------------------
// Read surfaces
// ---------------------------------------------------------------------------

pub(crate) async fn alert_logs(
    State(st): State<Arc<AppState>>,
    Query(q): Query<AlertLogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = AlertLogFilter {
        alert_rule_id: q.alert_rule_id,
        user_id: q.user_id,
        action_type: q.action_type,
    };
    let page = Page::clamped(q.limit, q.offset);
    let result = alert_log_history(&st.db, &filter, page)
        .await
        .map_err(|e| fail(&st, e))?;
    Ok(Json(result))
}

pub(crate) async fn ingestion_history(
    State(st): State<Arc<AppState>>,
    Query(q): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = Page::clamped(q.limit, q.offset);
    let result = ingestion_run_history(&st.db, page)
        .await
        .map_err(|e| fail(&st, e))?;
    Ok(Json(result))
}

pub(crate) async fn records(
    State(st): State<Arc<AppState>>,
    Query(q): Query<RecordsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = RecordFilter {
        entity_name_norm: q.entity_name_norm,
        region: q.region,
    };
    let page = Page::clamped(q.limit, q.offset);
    let result = record_page(&st.db, &filter, page)
        .await
        .map_err(|e| fail(&st, e))?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// GET /api/export/csv
// ---------------------------------------------------------------------------

pub(crate) async fn export_csv(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let filter = RecordFilter {
        entity_name_norm: q.entity_name_norm,
        region: q.region,
    };
    let rows = records_for_export(&st.db, &filter, q.limit)
        .await
        .map_err(|e| fail(&st, e))?;
    let csv = render_csv(&rows).map_err(|e| fail(&st, e))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"records.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

fn render_csv(rows: &[RecordRow]) -> Result<String, CoreError> {
    let csv_fault =
        |err: csv::Error| CoreError::storage(format!("csv serialization failed: {err}"), false);

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "source_key",
            "published_at",
            "title",
            "entity_name_raw",
            "entity_name_norm",
            "region",
            "record_id",
            "status",
            "document_url",
            "content_hash",
            "last_source_type",
            "updated_at",
        ])
        .map_err(csv_fault)?;

    for row in rows {
        let published_at = row.published_at.to_rfc3339();
        let updated_at = row.updated_at.to_rfc3339();
        writer
            .write_record([
                row.source_key.as_str(),
                published_at.as_str(),
                row.title.as_str(),
                row.entity_name_raw.as_str(),
                row.entity_name_norm.as_str(),
                row.region.as_str(),
                row.record_id.as_str(),
                row.status.as_str(),
                row.document_url.as_deref().unwrap_or(""),
                row.content_hash.as_str(),
                row.last_source_type.as_str(),
                updated_at.as_str(),
            ])
            .map_err(csv_fault)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| CoreError::storage(format!("csv flush failed: {err}"), false))?;
    String::from_utf8(bytes)
        .map_err(|err| CoreError::storage(format!("csv output was not utf-8: {err}"), false))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
