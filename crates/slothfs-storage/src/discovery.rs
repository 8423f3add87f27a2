//! Device discovery pipeline.
//!
//! A pass runs four named phases: `list → filter → create-missing → diff`.
//! Only the first two can fail the whole pass; a device whose storage
//! directory cannot be created is skipped and reported, never fatal.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{DiscoveryError, DiscoveryPhase};

/// A device left out of the scan result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDevice {
    /// The device that was skipped.
    pub device: Device,
    /// Phase that rejected it.
    pub phase: DiscoveryPhase,
    /// Human readable cause.
    pub reason: String,
}

/// Result of the list, filter and create-missing phases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    /// Usable devices, sorted.
    pub devices: Vec<Device>,
    /// Devices whose storage directory already existed.
    pub existing: Vec<Device>,
    /// Devices whose storage directory was created by this scan.
    pub created: Vec<Device>,
    /// Devices dropped from the list.
    pub skipped: Vec<SkippedDevice>,
}

/// Difference between two device lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDiff {
    /// In `current` but not `previous`.
    pub added: Vec<Device>,
    /// In `previous` but not `current`.
    pub removed: Vec<Device>,
}

impl DeviceDiff {
    /// True when the lists hold the same devices.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Run the list, filter and create-missing phases against `devices_path`.
pub async fn scan(
    devices_path: &Path,
    storage_dir_name: &str,
    concurrency: usize,
) -> Result<ScanOutcome, DiscoveryError> {
    let entries = list_entries(devices_path).await?;
    debug!(phase = ?DiscoveryPhase::List, count = entries.len(), "listed devices path");

    let dirs = filter_dirs(entries, concurrency).await;
    if dirs.is_empty() {
        return Err(DiscoveryError::NoDevicesFound {
            path: devices_path.to_path_buf(),
        });
    }
    debug!(phase = ?DiscoveryPhase::Filter, count = dirs.len(), "filtered device directories");

    let candidates: Vec<Device> = dirs
        .into_iter()
        .map(|root| Device::new(root, storage_dir_name))
        .collect();
    Ok(create_missing(candidates, concurrency).await)
}

async fn list_entries(devices_path: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let unreadable = |source| DiscoveryError::DevicesPathUnreadable {
        path: devices_path.to_path_buf(),
        source,
    };

    let mut reader = tokio::fs::read_dir(devices_path).await.map_err(unreadable)?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(unreadable)? {
        entries.push(entry.path());
    }
    Ok(entries)
}

async fn filter_dirs(entries: Vec<PathBuf>, concurrency: usize) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = stream::iter(entries)
        .map(|path| async move {
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => Some(path),
                _ => None,
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|dir| async move { dir })
        .collect()
        .await;
    dirs.sort();
    dirs
}

enum Prepared {
    Existing(Device),
    Created(Device),
    Skipped(SkippedDevice),
}

async fn create_missing(candidates: Vec<Device>, concurrency: usize) -> ScanOutcome {
    let results: Vec<Prepared> = stream::iter(candidates)
        .map(|device| async move {
            match tokio::fs::metadata(device.path()).await {
                Ok(meta) if meta.is_dir() => return Prepared::Existing(device),
                _ => {}
            }
            match tokio::fs::create_dir(device.path()).await {
                Ok(()) => Prepared::Created(device),
                Err(e) => {
                    warn!(
                        device = %device.root().display(),
                        error = %e,
                        "cannot create storage directory, skipping device"
                    );
                    Prepared::Skipped(SkippedDevice {
                        device,
                        phase: DiscoveryPhase::CreateMissing,
                        reason: e.to_string(),
                    })
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut outcome = ScanOutcome::default();
    for prepared in results {
        match prepared {
            Prepared::Existing(d) => outcome.existing.push(d),
            Prepared::Created(d) => outcome.created.push(d),
            Prepared::Skipped(s) => outcome.skipped.push(s),
        }
    }
    outcome.existing.sort();
    outcome.created.sort();
    outcome
        .skipped
        .sort_by(|a, b| a.device.cmp(&b.device));
    outcome.devices = outcome
        .existing
        .iter()
        .chain(outcome.created.iter())
        .cloned()
        .collect();
    outcome.devices.sort();
    outcome
}

/// Compare device lists.
pub fn diff(previous: &[Device], current: &[Device]) -> DeviceDiff {
    DeviceDiff {
        added: current
            .iter()
            .filter(|d| !previous.contains(d))
            .cloned()
            .collect(),
        removed: previous
            .iter()
            .filter(|d| !current.contains(d))
            .cloned()
            .collect(),
    }
}
