//! The closed error taxonomy.
//!
//! Every core component fails with a [`CoreError`]. The set of variants is
//! deliberately closed: boundary layers (the HTTP daemon) map variants to
//! statuses, and the storage gateway's retry loop keys off
//! [`CoreError::retryable`]. The taxonomy itself knows nothing about HTTP.

use thiserror::Error;

/// Boxed underlying cause carried by storage failures.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input at a public boundary. No side effects have occurred.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// A referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The caller is not allowed to act on the referenced entity.
    #[error("not authorized: {message}")]
    Authorization { message: String },

    /// A business rule (quota, plan gating) refused the operation.
    #[error("{message}")]
    BusinessLogic { message: String },

    /// A database fault. `retryable` is true for transient faults
    /// (connection refused, timeout, admin shutdown, serialization failure);
    /// constraint violations and deadlocks are fatal. `sqlstate` is the
    /// Postgres error code when one was reported.
    #[error("storage error: {message}")]
    Storage {
        message: String,
        retryable: bool,
        sqlstate: Option<String>,
        #[source]
        source: Option<Cause>,
    },
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        CoreError::Authorization {
            message: message.into(),
        }
    }

    pub fn business(message: impl Into<String>) -> Self {
        CoreError::BusinessLogic {
            message: message.into(),
        }
    }

    /// A storage failure with no underlying driver error (e.g. a deadline).
    pub fn storage(message: impl Into<String>, retryable: bool) -> Self {
        CoreError::Storage {
            message: message.into(),
            retryable,
            sqlstate: None,
            source: None,
        }
    }

    /// Whether the standalone-query retry loop may re-attempt this failure.
    /// Only storage faults are ever retryable; transactional work never
    /// retries regardless of this flag.
    pub fn retryable(&self) -> bool {
        matches!(self, CoreError::Storage { retryable: true, .. })
    }

    /// The Postgres SQLSTATE attached to a storage fault, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            CoreError::Storage { sqlstate, .. } => sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Short stable tag for logs and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "validation",
            CoreError::NotFound { .. } => "not_found",
            CoreError::Authorization { .. } => "authorization",
            CoreError::BusinessLogic { .. } => "business_logic",
            CoreError::Storage { .. } => "storage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_is_storage_only() {
        assert!(CoreError::storage("connection refused", true).retryable());
        assert!(!CoreError::storage("unique violation", false).retryable());
        assert!(!CoreError::validation("bad region").retryable());
        assert!(!CoreError::business("quota exceeded").retryable());
    }

    #[test]
    fn display_is_operator_readable() {
        let err = CoreError::not_found("user", 42);
        assert_eq!(err.to_string(), "user 42 not found");

        let err = CoreError::validation("region must match ^[A-Z]{2}$");
        assert_eq!(
            err.to_string(),
            "validation failed: region must match ^[A-Z]{2}$"
        );
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(CoreError::validation("x").kind(), "validation");
        assert_eq!(CoreError::storage("x", false).kind(), "storage");
        assert_eq!(CoreError::authorization("x").kind(), "authorization");
    }
}
