//! Store error types.

use thiserror::Error;

/// Errors returned by store operations. Each variant maps onto one class of
/// the HTTP error taxonomy.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite failure (connection, constraint, query)
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Content could not be sealed
    #[error("encryption error: {0}")]
    Crypto(String),

    /// Conversation, message, reaction or user absent
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Valid identity, insufficient role or not a participant
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Missing or malformed input
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
