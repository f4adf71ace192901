//! Rule store: per-user cache with a freshness stamp, plan quotas, and rule
//! CRUD with ownership checks.
//!
//! The cache is advisory and serves list endpoints only; anything that must
//! be authoritative (the quota check here, matching in `fanout.rs`) queries
//! the database directly.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rgw_db::{classify, Db};
use rgw_schemas::{is_valid_region, CoreError};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

/// Rule listings older than this are reloaded on the next read.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// Maximum live rules per plan; `None` is unlimited.
pub fn plan_limit(plan: &str) -> Option<i64> {
    match plan {
        "team" => None,
        "pro" => Some(5),
        _ => Some(1), // starter
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: i64,
    pub user_id: i64,
    pub entity_name_norm: Option<String>,
    pub region: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAlertRule {
    pub user_id: i64,
    pub entity_name_norm: Option<String>,
    pub region: Option<String>,
}

/// A created rule plus the plan accounting that allowed it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRule {
    pub rule: AlertRule,
    pub plan: String,
    pub rules_used: i64,
    pub rules_limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RuleStats {
    pub user_id: i64,
    pub total_rules: i64,
    pub total_triggers: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

fn validate_new_rule(new: &NewAlertRule) -> Result<(), CoreError> {
    if new.user_id <= 0 {
        return Err(CoreError::validation("userId must be a positive integer"));
    }
    if new.entity_name_norm.is_none() && new.region.is_none() {
        return Err(CoreError::validation(
            "at least one of entityNameNorm or region must be set",
        ));
    }
    if let Some(norm) = &new.entity_name_norm {
        if norm.is_empty() || norm.len() > 255 {
            return Err(CoreError::validation(
                "entityNameNorm must be between 1 and 255 characters",
            ));
        }
    }
    if let Some(region) = &new.region {
        if !is_valid_region(region) {
            return Err(CoreError::validation(format!(
                "region must match ^[A-Z]{{2}}$, got '{region}'"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct RuleCache {
    by_user: HashMap<i64, Vec<AlertRule>>,
    refreshed_at: Option<Instant>,
}

pub struct AlertStore {
    db: Db,
    cache: RwLock<RuleCache>,
}

impl AlertStore {
    pub fn new(db: Db) -> Self {
        AlertStore {
            db,
            cache: RwLock::new(RuleCache {
                by_user: HashMap::new(),
                refreshed_at: None,
            }),
        }
    }

    /// Create a rule for a user, enforcing the plan quota.
    ///
    /// The plan read takes `FOR UPDATE` on the user row so that two
    /// concurrent creates serialize: the second waits, re-counts, and fails
    /// the quota check instead of over-provisioning.
    pub async fn create_rule(&self, new: NewAlertRule) -> Result<CreatedRule, CoreError> {
        validate_new_rule(&new)?;

        let mut txn = self.db.pool().begin().await.map_err(classify)?;

        let plan: Option<String> =
            sqlx::query_scalar("select plan from users where id = $1 for update")
                .bind(new.user_id)
                .fetch_optional(&mut *txn)
                .await
                .map_err(classify)?;
        let Some(plan) = plan else {
            return Err(CoreError::not_found("user", new.user_id));
        };

        let used: i64 = sqlx::query_scalar("select count(*) from alert_rules where user_id = $1")
            .bind(new.user_id)
            .fetch_one(&mut *txn)
            .await
            .map_err(classify)?;

        let limit = plan_limit(&plan);
        if let Some(limit) = limit {
            if used >= limit {
                return Err(CoreError::business(format!(
                    "plan '{plan}' allows {limit} alert rule(s); user {} already has {used}",
                    new.user_id
                )));
            }
        }

        let rule: AlertRule = sqlx::query_as(
            "insert into alert_rules (user_id, entity_name_norm, region) \
             values ($1, $2, $3) \
             returning id, user_id, entity_name_norm, region, created_at",
        )
        .bind(new.user_id)
        .bind(&new.entity_name_norm)
        .bind(&new.region)
        .fetch_one(&mut *txn)
        .await
        .map_err(classify)?;

        txn.commit().await.map_err(classify)?;
        self.invalidate().await;

        Ok(CreatedRule {
            rule,
            plan,
            rules_used: used + 1,
            rules_limit: limit,
        })
    }

    /// Delete a rule, enforcing ownership: missing rule is NotFound, a rule
    /// owned by someone else is Authorization.
    pub async fn delete_rule(&self, rule_id: i64, user_id: i64) -> Result<(), CoreError> {
        let pool = self.db.pool().clone();
        let owner: Option<i64> = self
            .db
            .with_retry("select alert rule owner", move || {
                let pool = pool.clone();
                async move {
                    sqlx::query_scalar("select user_id from alert_rules where id = $1")
                        .bind(rule_id)
                        .fetch_optional(&pool)
                        .await
                }
            })
            .await?;

        let Some(owner) = owner else {
            return Err(CoreError::not_found("alert rule", rule_id));
        };
        if owner != user_id {
            return Err(CoreError::authorization(format!(
                "alert rule {rule_id} belongs to another user"
            )));
        }

        let pool = self.db.pool().clone();
        self.db
            .with_retry("delete alert rule", move || {
                let pool = pool.clone();
                async move {
                    sqlx::query("delete from alert_rules where id = $1")
                        .bind(rule_id)
                        .execute(&pool)
                        .await
                }
            })
            .await?;

        self.invalidate().await;
        Ok(())
    }

    /// A user's rules from the cache, reloading when the stamp is stale.
    pub async fn user_rules(&self, user_id: i64) -> Result<Vec<AlertRule>, CoreError> {
        Ok(self
            .cached_rules(Some(user_id))
            .await?
            .remove(&user_id)
            .unwrap_or_default())
    }

    /// The cached per-user rule map, refreshed when older than the 5-minute
    /// TTL. Racing refreshes are permitted; each produces a consistent
    /// snapshot and the last stamp wins.
    pub async fn cached_rules(
        &self,
        _user_id: Option<i64>,
    ) -> Result<HashMap<i64, Vec<AlertRule>>, CoreError> {
        {
            let cache = self.cache.read().await;
            if let Some(at) = cache.refreshed_at {
                if at.elapsed() < CACHE_TTL {
                    return Ok(cache.by_user.clone());
                }
            }
        }

        let pool = self.db.pool().clone();
        let rules: Vec<AlertRule> = self
            .db
            .with_retry("select all alert rules", move || {
                let pool = pool.clone();
                async move {
                    sqlx::query_as(
                        "select id, user_id, entity_name_norm, region, created_at \
                         from alert_rules order by user_id, id",
                    )
                    .fetch_all(&pool)
                    .await
                }
            })
            .await?;

        let mut by_user: HashMap<i64, Vec<AlertRule>> = HashMap::new();
        for rule in rules {
            by_user.entry(rule.user_id).or_default().push(rule);
        }
        debug!(users = by_user.len(), "alert rule cache refreshed");

        let mut cache = self.cache.write().await;
        cache.by_user = by_user.clone();
        cache.refreshed_at = Some(Instant::now());
        Ok(by_user)
    }

    /// Drop the freshness stamp; the next read reloads.
    pub async fn invalidate(&self) {
        self.cache.write().await.refreshed_at = None;
    }

    /// Rule and trigger counts for a user's stats endpoint. Always reads the
    /// database (counts would go stale in the cache).
    pub async fn user_rule_stats(&self, user_id: i64) -> Result<RuleStats, CoreError> {
        let pool = self.db.pool().clone();
        let exists: Option<i64> = self
            .db
            .with_retry("select user id", move || {
                let pool = pool.clone();
                async move {
                    sqlx::query_scalar("select id from users where id = $1")
                        .bind(user_id)
                        .fetch_optional(&pool)
                        .await
                }
            })
            .await?;
        if exists.is_none() {
            return Err(CoreError::not_found("user", user_id));
        }

        const SQL: &str = "\
            select $1::bigint as user_id, \
                   (select count(*) from alert_rules where user_id = $1) as total_rules, \
                   count(al.id) as total_triggers, \
                   max(al.triggered_at) as last_triggered_at \
            from alert_logs al \
            join alert_rules ar on ar.id = al.alert_rule_id \
            where ar.user_id = $1";

        let pool = self.db.pool().clone();
        self.db
            .with_retry(SQL, move || {
                let pool = pool.clone();
                async move { sqlx::query_as(SQL).bind(user_id).fetch_one(&pool).await }
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
