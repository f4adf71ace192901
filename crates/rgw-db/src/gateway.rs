//! The gateway proper: pool ownership, transient-fault retry for standalone
//! queries, slow-query observation, the health probe with its bounded
//! reconnect loop, pool stats, and bounded shutdown.
//!
//! Retry discipline: only queries issued through [`Db::with_retry`] are ever
//! re-attempted, and only when the classified failure is transient. Work
//! running inside a transaction must use the transaction handle directly;
//! a failure there aborts the transaction and the caller decides.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rgw_schemas::CoreError;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::{database_url_from_env, DbSettings};

/// Standalone queries get three attempts total.
const MAX_QUERY_ATTEMPTS: u32 = 3;
/// Exponential backoff base / cap for both query retry and reconnect.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(5);
/// Queries slower than this are surfaced as warnings.
const SLOW_QUERY: Duration = Duration::from_secs(1);
/// Wall deadline for the health probe.
const HEALTH_DEADLINE: Duration = Duration::from_secs(5);
/// Reconnect loop gives up after this many probes.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Ceiling on pool shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Map a driver error into the closed taxonomy.
///
/// Transient (retryable): I/O faults, pool acquire timeouts, a closed pool,
/// connection-exception SQLSTATEs (class 08), admin shutdown (57P01), and
/// serialization failures (40001). Everything else is fatal, notably
/// constraint violations (class 23) and deadlocks (40P01).
pub fn classify(err: sqlx::Error) -> CoreError {
    let (message, retryable, sqlstate) = match &err {
        sqlx::Error::Io(io) => (format!("i/o error: {io}"), true, None),
        sqlx::Error::PoolTimedOut => (
            "timed out waiting for a pool connection".to_string(),
            true,
            None,
        ),
        sqlx::Error::PoolClosed => ("connection pool is closed".to_string(), true, None),
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned());
            let retryable = matches!(code.as_deref(), Some("40001") | Some("57P01"))
                || code.as_deref().is_some_and(|c| c.starts_with("08"));
            (db.message().to_string(), retryable, code)
        }
        other => (other.to_string(), false, None),
    };

    CoreError::Storage {
        message,
        retryable,
        sqlstate,
        source: Some(Box::new(err)),
    }
}

fn backoff(attempt: u32) -> Duration {
    let factor = 1u32 << (attempt - 1).min(8);
    (BACKOFF_BASE * factor).min(BACKOFF_CAP)
}

fn observe_slow(sql: &str, elapsed: Duration) {
    if elapsed >= SLOW_QUERY {
        let head: String = sql.chars().take(100).collect();
        warn!(
            elapsed_ms = elapsed.as_millis() as u64,
            sql = %head,
            "slow query"
        );
    }
}

// ---------------------------------------------------------------------------
// Pool stats
// ---------------------------------------------------------------------------

/// Snapshot of pool health for the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub max: u32,
    pub reconnect_attempts: u32,
    pub connected: bool,
}

// ---------------------------------------------------------------------------
// Db
// ---------------------------------------------------------------------------

/// Cloneable handle over the connection pool plus gateway state.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
    pool_max: u32,
    connected: Arc<AtomicBool>,
    reconnecting: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU32>,
}

impl Db {
    /// Build the pool from explicit settings.
    pub async fn connect(settings: &DbSettings) -> Result<Self, CoreError> {
        Self::connect_url(&settings.url(), settings).await
    }

    /// Build the pool from the environment (`RGW_DATABASE_URL` override or
    /// the `DB_*` family).
    pub async fn connect_from_env() -> Result<Self, CoreError> {
        let settings = DbSettings::from_env()?;
        let url = database_url_from_env()?;
        Self::connect_url(&url, &settings).await
    }

    async fn connect_url(url: &str, settings: &DbSettings) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.pool_max)
            .min_connections(settings.pool_min)
            .idle_timeout(settings.idle_timeout)
            .acquire_timeout(settings.connect_timeout)
            .connect(url)
            .await
            .map_err(classify)?;

        Ok(Db {
            pool,
            pool_max: settings.pool_max,
            connected: Arc::new(AtomicBool::new(true)),
            reconnecting: Arc::new(AtomicBool::new(false)),
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Wrap an existing pool (scenario tests that build their own).
    pub fn from_pool(pool: PgPool, pool_max: u32) -> Self {
        Db {
            pool,
            pool_max,
            connected: Arc::new(AtomicBool::new(true)),
            reconnecting: Arc::new(AtomicBool::new(false)),
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run a standalone query with timing and transient-fault retry: three
    /// attempts total, exponential backoff (1s base, 5s cap), re-attempted
    /// only when [`classify`] marks the failure retryable.
    ///
    /// `sql` is a label for observation; `op` must build a fresh future per
    /// attempt.
    pub async fn with_retry<T, F, Fut>(&self, sql: &str, mut op: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt = 1u32;
        loop {
            let started = Instant::now();
            let result = op().await;
            observe_slow(sql, started.elapsed());

            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let core = classify(err);
                    if attempt >= MAX_QUERY_ATTEMPTS || !core.retryable() {
                        return Err(core);
                    }
                    let delay = backoff(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %core,
                        "transient query failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Trivial read under a 5s wall deadline. Success flips the connected
    /// flag true; failure flips it false and engages the reconnect loop.
    pub async fn health_check(&self) -> bool {
        let probe = sqlx::query_scalar::<_, i32>("select 1").fetch_one(&self.pool);
        match tokio::time::timeout(HEALTH_DEADLINE, probe).await {
            Ok(Ok(_)) => {
                self.connected.store(true, Ordering::Relaxed);
                true
            }
            Ok(Err(err)) => {
                warn!(error = %err, "health probe failed");
                self.mark_disconnected();
                false
            }
            Err(_) => {
                warn!("health probe exceeded its 5s deadline");
                self.mark_disconnected();
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool_max,
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            connected: self.is_connected(),
        }
    }

    /// Close the pool under the 10s shutdown ceiling. On timeout the pool
    /// reference is dropped regardless; in-flight queries are abandoned.
    pub async fn close(&self) {
        if tokio::time::timeout(SHUTDOWN_DEADLINE, self.pool.close())
            .await
            .is_err()
        {
            warn!("pool close exceeded the 10s shutdown ceiling; dropping the pool");
        }
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.spawn_reconnect();
    }

    /// Background reconnect loop: up to five probes with exponential
    /// backoff. After exhaustion the gateway stays degraded until the next
    /// successful probe (health checks keep running regardless).
    fn spawn_reconnect(&self) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return; // loop already running
        }

        let db = self.clone();
        tokio::spawn(async move {
            for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
                db.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(backoff(attempt)).await;

                let probe = sqlx::query_scalar::<_, i32>("select 1").fetch_one(db.pool());
                if matches!(
                    tokio::time::timeout(HEALTH_DEADLINE, probe).await,
                    Ok(Ok(_))
                ) {
                    info!(attempt, "database connection restored");
                    db.connected.store(true, Ordering::Relaxed);
                    db.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }
                warn!(attempt, "reconnect probe failed");
            }
            warn!("reconnect attempts exhausted; gateway degraded");
            db.reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
