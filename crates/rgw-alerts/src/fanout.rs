//! Transactional fan-out: match every alert rule against one just-changed
//! record and append the matches to the alert log.
//!
//! Runs on the caller's transaction handle, so the log rows commit or roll
//! back with the upsert that triggered them. Matching deliberately bypasses
//! the rule cache: an unset filter is a wildcard, and the check must see the
//! state inside the writer's snapshot.

use rgw_db::classify;
use rgw_schemas::CoreError;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use std::fmt;
use tracing::{debug, warn};

/// What happened to the record that is fanning out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    Insert,
    Update,
}

impl AlertAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertAction::Insert => "insert",
            AlertAction::Update => "update",
        }
    }
}

impl fmt::Display for AlertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fan-out outcome: how many log rows were appended and for which rules.
#[derive(Debug, Clone, Default)]
pub struct FanOut {
    pub triggered: usize,
    pub rule_ids: Vec<i64>,
}

/// Evaluate all alert rules against the record with primary key `record_pk`
/// and append one `alert_logs` row per match in a single multi-row insert.
///
/// A missing record is logged and returns zero triggers without failing;
/// the surrounding run must not die because a fan-out target vanished.
pub async fn fan_out(
    conn: &mut PgConnection,
    record_pk: i64,
    action: AlertAction,
) -> Result<FanOut, CoreError> {
    let target: Option<(String, String)> =
        sqlx::query_as("select entity_name_norm, region from records where id = $1")
            .bind(record_pk)
            .fetch_optional(&mut *conn)
            .await
            .map_err(classify)?;

    let Some((entity_name_norm, region)) = target else {
        warn!(record_pk, "fan-out target record not found; skipping");
        return Ok(FanOut::default());
    };

    let rule_ids: Vec<i64> = sqlx::query_scalar(
        "select id from alert_rules \
         where (entity_name_norm is null or entity_name_norm = $1) \
           and (region is null or region = $2) \
         order by id",
    )
    .bind(&entity_name_norm)
    .bind(&region)
    .fetch_all(&mut *conn)
    .await
    .map_err(classify)?;

    if rule_ids.is_empty() {
        return Ok(FanOut::default());
    }

    // One multi-row insert: fewer round-trips when a record matches many
    // rules, and the append is atomic with the upsert.
    let mut qb: QueryBuilder<'_, Postgres> =
        QueryBuilder::new("insert into alert_logs (alert_rule_id, record_id, action_type) ");
    qb.push_values(rule_ids.iter(), |mut row, rule_id| {
        row.push_bind(rule_id)
            .push_bind(record_pk)
            .push_bind(action.as_str());
    });
    qb.build().execute(&mut *conn).await.map_err(classify)?;

    debug!(
        record_pk,
        action = %action,
        triggered = rule_ids.len(),
        "alert fan-out appended log rows"
    );

    Ok(FanOut {
        triggered: rule_ids.len(),
        rule_ids,
    })
}
