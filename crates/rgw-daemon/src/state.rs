//! Shared runtime state for the daemon.
//!
//! Every service is an explicit component constructed once here and passed
//! down; handlers receive `State<Arc<AppState>>` from Axum. No module-level
//! mutable state anywhere.

use std::path::PathBuf;

use rgw_alerts::AlertStore;
use rgw_db::Db;
use rgw_ingest::IngestEngine;
use rgw_schemas::CoreError;

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in the health response.
#[derive(Clone, Copy, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Listener settings from the environment: `PORT` (default 8080) and
/// `APP_ENV` (`development` surfaces storage-error detail; anything else
/// redacts it).
#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub port: u16,
    pub dev_mode: bool,
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, CoreError> {
        let port = match std::env::var("PORT") {
            Err(_) => 8080,
            Ok(raw) => raw.parse().map_err(|_| {
                CoreError::validation(format!("env var PORT is not a valid port: '{raw}'"))
            })?,
        };
        let dev_mode = std::env::var("APP_ENV")
            .map(|env| env == "development")
            .unwrap_or(false);
        Ok(ServerSettings { port, dev_mode })
    }
}

/// Where the file connectors read from: `CONNECTOR_BULK_PATH` and
/// `CONNECTOR_RECENT_PATH`. Either may be unset; the matching ingest
/// endpoint then refuses with a validation error.
#[derive(Clone, Debug, Default)]
pub struct ConnectorPaths {
    pub bulk: Option<PathBuf>,
    pub recent: Option<PathBuf>,
}

impl ConnectorPaths {
    pub fn from_env() -> Self {
        ConnectorPaths {
            bulk: std::env::var("CONNECTOR_BULK_PATH").ok().map(PathBuf::from),
            recent: std::env::var("CONNECTOR_RECENT_PATH").ok().map(PathBuf::from),
        }
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Shared across all handlers behind an `Arc`.
pub struct AppState {
    pub db: Db,
    pub engine: IngestEngine,
    pub alerts: AlertStore,
    pub connectors: ConnectorPaths,
    pub build: BuildInfo,
    pub dev_mode: bool,
}

impl AppState {
    pub fn new(db: Db, connectors: ConnectorPaths, dev_mode: bool) -> Self {
        AppState {
            engine: IngestEngine::new(db.clone()),
            alerts: AlertStore::new(db.clone()),
            db,
            connectors,
            build: BuildInfo {
                service: "rgw-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            dev_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test so the PORT mutations cannot race each other.
    #[test]
    fn server_settings_from_env() {
        std::env::remove_var("PORT");
        std::env::remove_var("APP_ENV");
        let s = ServerSettings::from_env().unwrap();
        assert_eq!(s.port, 8080);
        assert!(!s.dev_mode);

        std::env::set_var("PORT", "eighty");
        assert!(ServerSettings::from_env().is_err());
        std::env::remove_var("PORT");
    }
}
