//! Error types and result handling for the fanout core.
//!
//! Structured error taxonomy separating caller mistakes (bad input, unknown
//! IDs, invalid state transitions), conflicts, and infrastructure failures.
//! Only store failures propagate as hard errors; everything else is rejected
//! synchronously with no state change.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for internal operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or foreign-key conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Invalid caller input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation not allowed in the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl CoreError {
    /// Whether this error is a unique-constraint conflict.
    ///
    /// The ingestion path uses this to distinguish a concurrent duplicate
    /// submission (resolved by re-reading the existing event) from a real
    /// failure.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Conflict(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Self::Conflict(format!("foreign key constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = CoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn conflict_is_unique_violation() {
        assert!(CoreError::Conflict("dup".into()).is_unique_violation());
        assert!(!CoreError::Database("down".into()).is_unique_violation());
        assert!(!CoreError::InvalidInput("bad".into()).is_unique_violation());
    }
}
