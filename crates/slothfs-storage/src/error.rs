//! Error types for the storage subsystem.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error variants for device registry operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The registry currently holds no devices, so nothing can be written.
    #[error("No devices available for write")]
    NoDevicesAvailable,

    /// A device discovery pass failed.
    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The OS capacity query could not be run or parsed.
    #[error("Capacity query failed: {reason}")]
    CapacityQuery {
        /// Description of the failure.
        reason: String,
    },
}

impl StorageError {
    /// Whether a caller may retry the operation once the device set changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::NoDevicesAvailable)
    }
}

/// Phase of a discovery pass, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryPhase {
    /// Listing entries under the devices path.
    List,
    /// Keeping only the entries that are directories.
    Filter,
    /// Creating the reserved storage directory where it is missing.
    CreateMissing,
    /// Comparing the new device list with the previous one.
    Diff,
}

/// Failure of a discovery pass. Each variant belongs to exactly one phase.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The devices path itself cannot be read. Storage is not operating.
    #[error("Cannot read devices directory {path:?}: {source}")]
    DevicesPathUnreadable {
        /// The configured devices path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The devices path holds no directories.
    #[error("storage is not ready to operate, fail to find any devices in {path:?}")]
    NoDevicesFound {
        /// The configured devices path.
        path: PathBuf,
    },
}

impl DiscoveryError {
    /// The phase that produced this error.
    pub fn phase(&self) -> DiscoveryPhase {
        match self {
            DiscoveryError::DevicesPathUnreadable { .. } => DiscoveryPhase::List,
            DiscoveryError::NoDevicesFound { .. } => DiscoveryPhase::Filter,
        }
    }

    /// True for the hard failure that clears the device list with an error event.
    /// Everything else is reported as a warning.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DiscoveryError::DevicesPathUnreadable { .. })
    }
}
