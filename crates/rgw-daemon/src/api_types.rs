//! Request and response DTOs for the HTTP surface. JSON is camelCase to
//! match the exported wire contract.

use rgw_db::PoolStats;
use rgw_ingest::ServiceMetrics;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Optional body for `POST /api/ingest/{bulk,recent}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestRequest {
    pub batch_size: Option<usize>,
    pub validate: Option<bool>,
    /// Window hint forwarded to the recent connector; the engine enforces
    /// the actual 72-hour cutoff.
    pub hours: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlertRequest {
    pub user_id: i64,
    #[serde(default)]
    pub entity_name_norm: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAlertRequest {
    pub user_id: i64,
}

// ---------------------------------------------------------------------------
// Query strings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertLogQuery {
    pub alert_rule_id: Option<i64>,
    pub user_id: Option<i64>,
    pub action_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordsQuery {
    pub entity_name_norm: Option<String>,
    pub region: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportQuery {
    pub entity_name_norm: Option<String>,
    pub region: Option<String>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub database: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub ingestion: ServiceMetrics,
    pub pool: PoolStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAlertsResponse {
    pub user_id: i64,
    pub rules: Vec<rgw_alerts::AlertRule>,
}
