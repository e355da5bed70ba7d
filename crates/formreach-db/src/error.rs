//! Database error types.

use thiserror::Error;

/// Result type alias using `DatabaseError`.
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Errors from the audit sink.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open the database
    #[error("failed to open database: {0}")]
    Open(String),

    /// Migration execution failed
    #[error("migration error: {0}")]
    Migration(String),

    /// Query execution failed
    #[error("query error: {0}")]
    Query(#[from] sqlx::Error),

    /// Stored value could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DatabaseError::Open("no such directory".to_string());
        assert_eq!(err.to_string(), "failed to open database: no such directory");
    }
}
