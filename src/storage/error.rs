//! Reading store error types
//!
//! Defines all errors that can occur in the storage layer.

use thiserror::Error;

/// Errors that can occur while persisting or querying readings
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite rejected a statement or could not open the database
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored row could not be turned back into a reading
    #[error("Corrupt row: {0}")]
    Corruption(String),

    /// Background worker panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Task(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Task(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
