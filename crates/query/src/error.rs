//! Query error types

use warden_store::StoreError;

/// Errors raised while compiling or running a query
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid query at position {position}: {message}")]
    InvalidQuery { position: usize, message: String },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl QueryError {
    pub fn invalid(position: usize, message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            position,
            message: message.into(),
        }
    }
}

/// Result type alias for query operations
pub type QueryResult<T> = Result<T, QueryError>;
