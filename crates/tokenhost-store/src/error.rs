//! Store error types.
//!
//! Every [`TokenStore`](crate::TokenStore) implementation in this crate
//! surfaces failures through [`StoreError`].

/// Unified error type for token storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing file exists but does not contain a JSON object.
    #[error("store file is corrupted: {reason}")]
    Corrupted { reason: String },

    /// The backend refused the operation (e.g. a read-only mount, a lock
    /// held by another process).
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StoreError>;
