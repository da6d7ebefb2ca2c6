//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use rusqlite::ErrorCode;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key absent or expired on a default-less read
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The busy-wait bound elapsed while waiting for the database session
    #[error("Timed out waiting for the cache database: {0}")]
    Contention(String),

    /// Value or memoization argument could not be encoded or decoded
    #[error("Encoding failed: {0}")]
    Encoding(String),

    /// Counter operation against a missing, expired, or non-numeric value
    #[error("Invalid counter target: {0}")]
    TypeMismatch(String),

    /// Invalid construction parameters
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Any other failure reported by the storage engine
    #[error("Storage error: {0}")]
    Storage(#[source] rusqlite::Error),
}

// == SQLite Error Classification ==
/// Busy and locked results mean the configured wait bound elapsed, so they
/// surface as [`CacheError::Contention`] rather than a generic storage error.
impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                CacheError::Contention(err.to_string())
            }
            _ => CacheError::Storage(err),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_error_maps_to_contention() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(matches!(CacheError::from(err), CacheError::Contention(_)));
    }

    #[test]
    fn test_other_sqlite_error_maps_to_storage() {
        let err = rusqlite::Error::InvalidQuery;
        assert!(matches!(CacheError::from(err), CacheError::Storage(_)));
    }
}
