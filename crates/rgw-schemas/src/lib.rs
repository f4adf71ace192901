//! Shared vocabulary for the regwatch workspace: the canonical regulatory
//! record, the source-type tag, the content fingerprint, and the closed
//! error taxonomy every other crate consumes.

pub mod error;
pub mod fingerprint;
pub mod record;

pub use error::CoreError;
pub use fingerprint::fingerprint;
pub use record::{
    is_valid_region, normalize_entity_name, parse_published_at, RegulatoryRecord, SourceType,
};
