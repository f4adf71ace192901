//! The ingestion engine: validation, the recent-window time filter, and the
//! transactional run that upserts canonical records with source precedence
//! and fans out alerts for every insert or content change.

mod engine;
mod metrics;
mod validate;

pub use engine::{IngestEngine, IngestOptions, IngestOutcome};
pub use metrics::ServiceMetrics;
pub use validate::{record_violations, recent_window_filter, validate_batch, RECENT_WINDOW_HOURS};
