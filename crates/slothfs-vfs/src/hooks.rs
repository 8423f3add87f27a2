//! Collaborator seams between the merged filesystem and the replicator.
//!
//! The replicator decides which physical copies are safe to read
//! ([`Availability`]) and wants to hear about every completed write
//! ([`UpdateSink`]). The merged filesystem only sees these traits.

use std::path::Path;

use slothfs_storage::Device;

/// Whether the copy of `relative` on `device` may be served to readers.
pub trait Availability: Send + Sync {
    /// False hides this copy from lookups, reads and directory listings.
    fn is_ready(&self, device: &Device, relative: &Path) -> bool;
}

impl<F> Availability for F
where
    F: Fn(&Device, &Path) -> bool + Send + Sync,
{
    fn is_ready(&self, device: &Device, relative: &Path) -> bool {
        self(device, relative)
    }
}

/// Every copy is readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl Availability for AlwaysReady {
    fn is_ready(&self, _device: &Device, _relative: &Path) -> bool {
        true
    }
}

/// Hears about namespace changes the replicator has to follow.
pub trait UpdateSink: Send + Sync {
    /// A write of `relative` completed on `device`.
    fn file_updated(&self, device: &Device, relative: &Path);

    /// `from` was renamed to `to` on every device holding it. For a
    /// directory, everything below `from` moved as well.
    fn file_renamed(&self, _from: &Path, _to: &Path) {}
}

/// Ignores write notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardUpdates;

impl UpdateSink for DiscardUpdates {
    fn file_updated(&self, _device: &Device, _relative: &Path) {}
}
