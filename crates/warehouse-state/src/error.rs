//! Error types for warehouse-state

use thiserror::Error;

/// Errors that can occur in the flag persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Backend(String),

    /// Write lost a race with a concurrent transaction; safe to retry
    #[error("Write conflict, retry later: {0}")]
    Contention(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// A stored row could not be mapped back into a record
    #[error("Corrupt flag row {flag}: {reason}")]
    CorruptRow { flag: String, reason: String },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Whether the failed operation may succeed if simply attempted again.
    pub fn is_contention(&self) -> bool {
        matches!(self, StorageError::Contention(_))
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("conflict") || lower.contains("can be retried") {
            StorageError::Contention(msg)
        } else {
            StorageError::Backend(msg)
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
