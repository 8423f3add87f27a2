//! Events published by the replicator.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use slothfs_storage::Device;

/// Counters for one re-balance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceStats {
    /// Replication count the pass enforced.
    pub target: usize,
    /// Distinct files found across all devices.
    pub files_scanned: usize,
    /// Copies created on devices that lacked the file.
    pub copies_added: usize,
    /// Surplus copies deleted.
    pub copies_removed: usize,
    /// Per-file copy or delete failures (logged, not fatal).
    pub failures: usize,
    /// Files skipped because their copy-out was still pending.
    #[serde(default)]
    pub skipped_pending: usize,
}

/// Something observable happened in the replicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplicationEvent {
    /// The queue length observed by the worker differs from its last tick.
    QueueLengthChanged {
        /// Entries waiting, excluding the one about to be copied.
        length: usize,
    },
    /// One copy landed on a target device.
    Replicated {
        /// Namespace-relative path.
        path: PathBuf,
        /// Origin device.
        from: Device,
        /// Device that now holds a copy.
        to: Device,
    },
    /// A copy failed; the entry goes back to the tail of the queue.
    CopyFailed {
        /// Namespace-relative path.
        path: PathBuf,
        /// Target device.
        to: Device,
        /// Failed passes so far, including this one.
        attempts: u32,
        /// Description.
        message: String,
    },
    /// An entry was abandoned.
    Dropped {
        /// Namespace-relative path.
        path: PathBuf,
        /// Description.
        reason: String,
    },
    /// A re-balance pass began.
    ReplicationStarted {
        /// Replication count being enforced.
        target: usize,
    },
    /// A re-balance pass finished.
    ReplicationFinished {
        /// What the pass did.
        stats: RebalanceStats,
    },
    /// Non-fatal operational issue.
    Warning {
        /// Description.
        message: String,
    },
}
