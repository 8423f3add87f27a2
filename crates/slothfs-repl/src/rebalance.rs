//! Re-balancing the existing file set to a new replication count.
//!
//! A pass pauses the steady-state worker, marks every copy unreadable, walks
//! each device breadth-first to learn which devices hold which files, then
//! adds copies to random non-holders or deletes them from random holders.
//! Per-file failures are logged and counted; the pass always runs to the end.
//! Paths still waiting for copy-out are left to the worker, which picks them
//! up with the new count once the pass is over.
//!
//! Dropping the future mid-pass (abort, timeout) clears the re-balance state
//! so reads and later count changes work again. The count stays at the
//! target of the interrupted pass.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use futures::stream::{self, StreamExt};
use slothfs_storage::Device;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::copy::copy_file;
use crate::engine::Replicator;
use crate::error::{ReplError, Result};
use crate::events::{RebalanceStats, ReplicationEvent};

/// Result of [`Replicator::set_replication_count`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceOutcome {
    /// The count was already in effect; nothing ran.
    Unchanged,
    /// A pass is running; the count is applied when it finishes.
    Deferred,
    /// The last pass that ran before returning.
    Completed(RebalanceStats),
}

/// Relative file path to the devices holding a copy, in device order.
pub type HolderMap = BTreeMap<PathBuf, Vec<Device>>;

impl Replicator {
    /// Change the replication count and re-balance every existing file.
    ///
    /// Counts requested while a pass runs are recorded, and the newest one
    /// is applied once the current pass finishes.
    pub async fn set_replication_count(&self, count: usize) -> Result<RebalanceOutcome> {
        if count == 0 {
            warn!(count, "ignoring invalid replication count");
            self.events.publish(ReplicationEvent::Warning {
                message: format!("Invalid replication count: {}", count),
            });
            return Err(ReplError::InvalidReplicationCount { value: count });
        }

        {
            let mut pending = self.pending_count.lock();
            if self.is_rebalancing() {
                info!(count, "re-balance running, deferring replication count");
                *pending = Some(count);
                return Ok(RebalanceOutcome::Deferred);
            }
            if count == self.replication_count() {
                debug!(count, "replication count unchanged");
                return Ok(RebalanceOutcome::Unchanged);
            }
            self.rebalancing.store(true, Ordering::SeqCst);
        }
        let mut guard = RebalanceGuard {
            replicator: self,
            armed: true,
        };

        let _worker = self.worker.lock().await;
        let mut target = count;
        loop {
            let stats = self.rebalance_pass(target).await;

            let mut pending = self.pending_count.lock();
            match pending.take() {
                Some(next) if next != target => target = next,
                _ => {
                    self.rebalancing.store(false, Ordering::SeqCst);
                    guard.armed = false;
                    return Ok(RebalanceOutcome::Completed(stats));
                }
            }
        }
    }

    async fn rebalance_pass(&self, target: usize) -> RebalanceStats {
        self.replication_count.store(target, Ordering::SeqCst);
        info!(target, "replication re-balance started");
        self.events
            .publish(ReplicationEvent::ReplicationStarted { target });

        let devices = self.registry.list_devices(true);
        let holders = walk(&devices, self.config.walk_concurrency).await;
        let mut stats = RebalanceStats {
            target,
            files_scanned: holders.len(),
            ..RebalanceStats::default()
        };

        for (relative, holding) in &holders {
            if self.is_pending(relative) {
                stats.skipped_pending += 1;
                debug!(path = %relative.display(), "pending copy-out, left to the worker");
                continue;
            }
            if holding.len() < target {
                self.add_copies(relative, holding, &devices, target, &mut stats)
                    .await;
            } else if holding.len() > target {
                self.remove_copies(relative, holding, target, &mut stats)
                    .await;
            }
        }

        info!(
            target,
            files = stats.files_scanned,
            added = stats.copies_added,
            removed = stats.copies_removed,
            failures = stats.failures,
            skipped_pending = stats.skipped_pending,
            "replication re-balance finished"
        );
        self.events.publish(ReplicationEvent::ReplicationFinished {
            stats: stats.clone(),
        });
        stats
    }

    async fn add_copies(
        &self,
        relative: &Path,
        holding: &[Device],
        devices: &[Device],
        target: usize,
        stats: &mut RebalanceStats,
    ) {
        let Some(origin) = holding.first() else {
            return;
        };
        let source = origin.join(relative);
        let mut missing: Vec<Device> = devices
            .iter()
            .filter(|d| !holding.contains(d))
            .cloned()
            .collect();
        self.shuffler.shuffle(&mut missing);

        for device in missing.into_iter().take(target - holding.len()) {
            match copy_file(&source, &device.join(relative)).await {
                Ok(_) => {
                    stats.copies_added += 1;
                    debug!(path = %relative.display(), to = %device, "added copy");
                }
                Err(e) => {
                    stats.failures += 1;
                    self.report_failure("copy", relative, &device, &e);
                }
            }
        }
    }

    async fn remove_copies(
        &self,
        relative: &Path,
        holding: &[Device],
        target: usize,
        stats: &mut RebalanceStats,
    ) {
        let surplus = self.shuffler.shuffled(holding);
        for device in surplus.into_iter().take(holding.len() - target) {
            match fs::remove_file(device.join(relative)).await {
                Ok(()) => {
                    stats.copies_removed += 1;
                    debug!(path = %relative.display(), from = %device, "removed copy");
                }
                Err(e) => {
                    stats.failures += 1;
                    self.report_failure("delete", relative, &device, &e);
                }
            }
        }
    }

    fn report_failure(&self, action: &str, relative: &Path, device: &Device, err: &io::Error) {
        warn!(
            action,
            path = %relative.display(),
            device = %device,
            error = %err,
            "re-balance step failed"
        );
        self.events.publish(ReplicationEvent::Warning {
            message: format!(
                "Failed to {} {:?} on {}: {}",
                action, relative, device, err
            ),
        });
    }
}

/// Resets the re-balance state when `set_replication_count` is dropped
/// before it finishes.
struct RebalanceGuard<'a> {
    replicator: &'a Replicator,
    armed: bool,
}

impl Drop for RebalanceGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut pending = self.replicator.pending_count.lock();
        let discarded = pending.take();
        self.replicator.rebalancing.store(false, Ordering::SeqCst);
        warn!(
            count = self.replicator.replication_count(),
            discarded = ?discarded,
            "re-balance cancelled"
        );
    }
}

/// Map every file under every device's storage directory to its holders.
///
/// Each level of the tree is listed across all devices with at most
/// `concurrency` directories open at once. Unreadable directories are
/// skipped with a warning.
pub async fn walk(devices: &[Device], concurrency: usize) -> HolderMap {
    let mut holders = HolderMap::new();
    let mut level: Vec<(Device, PathBuf)> =
        devices.iter().map(|d| (d.clone(), PathBuf::new())).collect();

    while !level.is_empty() {
        let listings: Vec<_> = stream::iter(std::mem::take(&mut level))
            .map(|(device, dir)| async move {
                let entries = list_dir(&device.join(&dir)).await;
                (device, dir, entries)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for (device, dir, entries) in listings {
            let entries = match entries {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(device = %device, dir = %dir.display(), error = %e, "cannot list directory");
                    continue;
                }
            };
            for (name, is_dir) in entries {
                let relative = dir.join(name);
                if is_dir {
                    level.push((device.clone(), relative));
                } else {
                    holders.entry(relative).or_default().push(device.clone());
                }
            }
        }
    }

    for holding in holders.values_mut() {
        holding.sort();
    }
    holders
}

async fn list_dir(dir: &Path) -> io::Result<Vec<(OsString, bool)>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        out.push((entry.file_name(), is_dir));
    }
    Ok(out)
}
