//! Error types for the replication subsystem.

use std::path::PathBuf;

use slothfs_storage::StorageError;
use thiserror::Error;

/// Errors that can occur in the replication subsystem.
#[derive(Debug, Error)]
pub enum ReplError {
    /// Replication count must be at least one.
    #[error("invalid replication count: {value}")]
    InvalidReplicationCount {
        /// The rejected value.
        value: usize,
    },

    /// Copying one file to another device failed.
    #[error("copy of {path:?} to {target:?} failed: {source}")]
    Copy {
        /// Namespace-relative path being replicated.
        path: PathBuf,
        /// Physical destination.
        target: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device registry error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for replication operations.
pub type Result<T> = std::result::Result<T, ReplError>;
