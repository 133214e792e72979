//! Error types for QuoteStore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::record::PrimaryKey;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for QuoteStore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Input Errors
    // -------------------------------------------------------------------------
    #[error("Normalization error: {0}")]
    Normalization(String),

    #[error("Query error: {0}")]
    Query(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Open error: {0}")]
    Open(String),

    #[error("Store not ready: {0}")]
    NotReady(String),

    // -------------------------------------------------------------------------
    // Write Errors
    // -------------------------------------------------------------------------
    #[error("Write rejected at {key}: {reason}")]
    Write { key: PrimaryKey, reason: String },

    #[error("Quota exceeded: snapshot needs {required} bytes, quota is {quota}")]
    QuotaExceeded { required: u64, quota: u64 },

    // -------------------------------------------------------------------------
    // Persistence Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Snapshot corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Bridge Errors
    // -------------------------------------------------------------------------
    #[error("Bridge error: {0}")]
    Bridge(String),
}

/// Coarse error classes reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Normalization,
    Open,
    NotReady,
    Write,
    Query,
    Bridge,
}

impl StoreError {
    /// Map this error onto the class the host surfaces to users
    pub fn category(&self) -> ErrorCategory {
        match self {
            StoreError::Normalization(_) => ErrorCategory::Normalization,
            StoreError::Query(_) => ErrorCategory::Query,
            StoreError::Open(_) | StoreError::Corruption(_) => ErrorCategory::Open,
            StoreError::NotReady(_) => ErrorCategory::NotReady,
            StoreError::Write { .. }
            | StoreError::QuotaExceeded { .. }
            | StoreError::Io(_)
            | StoreError::Storage(_)
            | StoreError::Serialization(_) => ErrorCategory::Write,
            StoreError::Bridge(_) => ErrorCategory::Bridge,
        }
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
