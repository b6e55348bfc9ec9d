//! Repository error types.

use thiserror::Error;

/// Errors returned by repository implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// The requested entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A conditional update found the entity in an unexpected state.
    #[error("Conflict updating {entity} {id}: {reason}")]
    Conflict {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// A stock adjustment would make the available quantity negative.
    #[error("Insufficient stock for good {id}: available {available}, delta {delta}")]
    InsufficientStock { id: String, available: i64, delta: i64 },

    /// The operation is not allowed in the entity's current state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The backing store could not be reached.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        RepositoryError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true for `NotFound` errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }

    /// Returns true for `Conflict` errors.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::Conflict { .. })
    }
}

/// Error returned when parsing an unknown status value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind} status: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// Convenience type alias for repository results.
pub type Result<T> = std::result::Result<T, RepositoryError>;
