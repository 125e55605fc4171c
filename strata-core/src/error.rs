//! Error types for Strata operations

use thiserror::Error;

/// Master error type for all Strata operations.
///
/// Every failure surfaced by the engine carries one of these kinds plus a
/// human-readable message. Deadlocks are retried inside the SQL client and
/// only surface as `Database` once retries are exhausted; cache failures are
/// logged and never surface at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrataError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Conflict on {resource} '{id}': {reason}")]
    Conflict {
        resource: &'static str,
        id: String,
        reason: String,
    },

    #[error("Authorization failed: {message}")]
    Authorization { message: String },

    #[error("Dependency violation: {message}")]
    Dependency { message: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// SQLSTATE code when the driver reported one (e.g. `40P01`).
        code: Option<String>,
    },

    #[error("Operation timed out: {message}")]
    Timeout { message: String },

    #[error("Internal invariant violated: {message}")]
    Internal { message: String },
}

impl StrataError {
    /// Build a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        StrataError::Validation {
            message: message.into(),
        }
    }

    /// Build a not-found error for a resource kind and identifier.
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        StrataError::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Build a conflict error.
    pub fn conflict(
        resource: &'static str,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        StrataError::Conflict {
            resource,
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Build an authorization error.
    pub fn authorization(message: impl Into<String>) -> Self {
        StrataError::Authorization {
            message: message.into(),
        }
    }

    /// Build a dependency error.
    pub fn dependency(message: impl Into<String>) -> Self {
        StrataError::Dependency {
            message: message.into(),
        }
    }

    /// Build a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        StrataError::Transaction {
            message: message.into(),
        }
    }

    /// Build a database error with an optional SQLSTATE code.
    pub fn database(message: impl Into<String>, code: Option<String>) -> Self {
        StrataError::Database {
            message: message.into(),
            code,
        }
    }

    /// Build a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        StrataError::Timeout {
            message: message.into(),
        }
    }

    /// Build an internal error. These indicate bugs, not user mistakes.
    pub fn internal(message: impl Into<String>) -> Self {
        StrataError::Internal {
            message: message.into(),
        }
    }

    /// PostgreSQL SQLSTATE for deadlock detection.
    pub const DEADLOCK_CODE: &'static str = "40P01";

    /// Whether this error is a driver-reported deadlock.
    pub fn is_deadlock(&self) -> bool {
        matches!(
            self,
            StrataError::Database { code: Some(code), .. } if code == Self::DEADLOCK_CODE
        )
    }
}

/// Result type alias for Strata operations.
pub type StrataResult<T> = Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlock_detection() {
        let err = StrataError::database("deadlock detected", Some("40P01".to_string()));
        assert!(err.is_deadlock());

        let err = StrataError::database("syntax error", Some("42601".to_string()));
        assert!(!err.is_deadlock());

        let err = StrataError::database("connection refused", None);
        assert!(!err.is_deadlock());
    }

    #[test]
    fn test_error_display() {
        let err = StrataError::not_found("collection", "users");
        assert_eq!(err.to_string(), "collection not found: users");

        let err = StrataError::conflict("document", "abc", "already exists");
        assert_eq!(err.to_string(), "Conflict on document 'abc': already exists");
    }
}
