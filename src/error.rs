//! Error types for tsvdb
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using TsvError
pub type Result<T> = std::result::Result<T, TsvError>;

/// Unified error type for tsvdb operations
#[derive(Debug, Error)]
pub enum TsvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Schema / Value Errors
    // -------------------------------------------------------------------------
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid value for column '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table has been dropped: {0}")]
    TableDropped(String),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    /// Persisted index disagrees with the data file. Recovered by a rebuild,
    /// never returned from a public table operation.
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Concurrency / Transaction Errors
    // -------------------------------------------------------------------------
    #[error("Lock contention on table '{table}' after waiting {waited_ms}ms")]
    LockContention { table: String, waited_ms: u64 },

    #[error("Transaction aborted: {source}")]
    TransactionAborted {
        #[source]
        source: Box<TsvError>,
    },

    #[error("Transaction already completed")]
    TransactionClosed,

    #[error("Operation rejected: {0}")]
    Rejected(String),

    // -------------------------------------------------------------------------
    // Backup Errors
    // -------------------------------------------------------------------------
    #[error("Backup error: {0}")]
    Backup(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TsvError {
    /// Wrap an error raised inside a transaction scope after rollback.
    ///
    /// Already-wrapped errors are passed through unchanged.
    pub fn aborted(source: TsvError) -> Self {
        match source {
            e @ TsvError::TransactionAborted { .. } => e,
            other => TsvError::TransactionAborted {
                source: Box::new(other),
            },
        }
    }

    /// True for errors a caller may retry (lock contention).
    pub fn is_retryable(&self) -> bool {
        matches!(self, TsvError::LockContention { .. })
    }
}

impl From<bincode::Error> for TsvError {
    fn from(e: bincode::Error) -> Self {
        TsvError::Serialization(e.to_string())
    }
}
