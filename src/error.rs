//! Error types for bucketkv
//!
//! Provides a unified error type for all store operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for bucketkv operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Key not found")]
    KeyNotFound,

    #[error("Bucket already exists: {0}")]
    BucketExists(String),

    // -------------------------------------------------------------------------
    // Argument Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Key too large")]
    KeyTooLarge,

    #[error("Value too large")]
    ValueTooLarge,

    // -------------------------------------------------------------------------
    // Configuration / Access Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store file is locked by another process: {}", .0.display())]
    Locked(PathBuf),

    #[error("Store was opened read-only")]
    ReadOnly,

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("Transaction aborted by an earlier storage error")]
    TxAborted,
}

impl StoreError {
    /// True for both missing-bucket and missing-key errors
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::BucketNotFound(_) | StoreError::KeyNotFound)
    }

    /// Shorthand used by page and node decoders
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        StoreError::Corruption(msg.into())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
