//! The replicator: steady-state copy-out worker and read availability.
//!
//! Every completed write lands on one device and is reported here through
//! [`UpdateSink`]. A background loop pops one queue entry per tick and copies
//! the file to enough other devices to reach the replication count. Until
//! that finishes, [`Availability::is_ready`] only admits the origin copy.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use slothfs_storage::{Device, DeviceRegistry, EventPublisher, Shuffler};
use slothfs_vfs::{Availability, UpdateSink};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::copy::copy_file;
use crate::error::{ReplError, Result};
use crate::events::ReplicationEvent;
use crate::queue::{QueueEntry, ReplicationQueue};

const EVENT_CAPACITY: usize = 256;

/// Configuration for the replicator.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Devices that should hold each file.
    pub replication_count: usize,
    /// Delay between worker ticks.
    pub idle_interval: Duration,
    /// Failed copy passes before an entry is dropped.
    pub max_copy_attempts: u32,
    /// Directories listed at once during a re-balance walk.
    pub walk_concurrency: usize,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            replication_count: 2,
            idle_interval: Duration::from_secs(1),
            max_copy_attempts: 5,
            walk_concurrency: 3,
        }
    }
}

/// What one worker tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was queued.
    Idle,
    /// All targets received a copy (possibly zero targets).
    Replicated {
        /// Copies made.
        copies: usize,
    },
    /// At least one copy failed and the entry was queued again.
    Requeued,
    /// The entry was abandoned.
    Dropped,
}

/// Replication engine bound to one device registry.
pub struct Replicator {
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) config: ReplConfig,
    pub(crate) replication_count: AtomicUsize,
    pub(crate) pending_count: Mutex<Option<usize>>,
    pub(crate) rebalancing: AtomicBool,
    /// Held by a tick while it copies and by a re-balance pass for its
    /// whole duration, which pauses the worker.
    pub(crate) worker: tokio::sync::Mutex<()>,
    pub(crate) shuffler: Shuffler,
    pub(crate) events: EventPublisher<ReplicationEvent>,
    queue: Mutex<ReplicationQueue>,
    last_queue_len: Mutex<Option<usize>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Replicator {
    /// Create an idle replicator.
    pub fn new(registry: Arc<DeviceRegistry>, config: ReplConfig) -> Result<Self> {
        if config.replication_count == 0 {
            return Err(ReplError::InvalidReplicationCount { value: 0 });
        }
        Ok(Self {
            registry,
            replication_count: AtomicUsize::new(config.replication_count),
            config,
            pending_count: Mutex::new(None),
            rebalancing: AtomicBool::new(false),
            worker: tokio::sync::Mutex::new(()),
            shuffler: Shuffler::from_entropy(),
            events: EventPublisher::new(EVENT_CAPACITY),
            queue: Mutex::new(ReplicationQueue::new()),
            last_queue_len: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Make re-balance target choices reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.shuffler = Shuffler::from_seed(seed);
        self
    }

    /// Spawn the worker loop.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        info!(
            replication_count = self.replication_count(),
            interval_ms = self.config.idle_interval.as_millis() as u64,
            "starting replicator"
        );
        let weak = Arc::downgrade(self);
        *task = Some(spawn_worker(self.config.idle_interval, weak));
    }

    /// Stop the worker loop. A copy in progress is abandoned with its task.
    pub fn shutdown(&self) {
        if let Some(task) = self.task.lock().take() {
            debug!("stopping replicator");
            task.abort();
        }
    }

    /// True while the worker loop is scheduled.
    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Subscribe to replication events.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicationEvent> {
        self.events.subscribe()
    }

    /// Replication count currently enforced.
    pub fn replication_count(&self) -> usize {
        self.replication_count.load(Ordering::SeqCst)
    }

    /// True while a re-balance pass runs.
    pub fn is_rebalancing(&self) -> bool {
        self.rebalancing.load(Ordering::SeqCst)
    }

    /// Entries waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the copy of `relative` on `device` may be read.
    ///
    /// False for every device while a re-balance runs. Otherwise only the
    /// origin copy of a pending path is ready, and every copy of any other
    /// path is.
    pub fn is_ready(&self, device: &Device, relative: &Path) -> bool {
        if self.is_rebalancing() {
            return false;
        }
        self.queue.lock().is_ready(device, relative)
    }

    /// True while `relative` is queued or being copied out.
    pub fn is_pending(&self, relative: &Path) -> bool {
        self.queue.lock().origin_of(relative).is_some()
    }

    /// Queue `relative` on `device` for copy-out.
    pub fn enqueue(&self, device: &Device, relative: &Path) {
        self.queue
            .lock()
            .push(device.clone(), relative.to_path_buf());
        debug!(device = %device, path = %relative.display(), "queued for replication");
    }

    /// Run one worker step: observe the queue length and copy out at most
    /// one entry. Waits while a re-balance pass runs.
    pub async fn tick(&self) -> TickOutcome {
        let _worker = self.worker.lock().await;
        self.observe_queue_len();

        let next = self.queue.lock().pop();
        let Some(entry) = next else {
            return TickOutcome::Idle;
        };
        self.replicate(entry).await
    }

    fn observe_queue_len(&self) {
        let length = self.queue.lock().len();
        let mut last = self.last_queue_len.lock();
        if *last == Some(length) {
            return;
        }
        let first = last.is_none();
        *last = Some(length);
        drop(last);
        // The initial empty reading is not a change.
        if first && length == 0 {
            return;
        }
        info!(length, "replication queue length changed");
        self.events
            .publish(ReplicationEvent::QueueLengthChanged { length });
    }

    async fn replicate(&self, entry: QueueEntry) -> TickOutcome {
        let source = entry.device.join(&entry.relative);
        if tokio::fs::metadata(&source).await.is_err() {
            return self.drop_entry(entry, "origin copy no longer exists");
        }

        let wanted = self.replication_count().saturating_sub(1);
        let targets = match self.targets_for(&entry, wanted).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(path = %entry.relative.display(), error = %e, "no replication targets");
                return self.fail(entry, None, e.to_string());
            }
        };
        if targets.len() < wanted {
            debug!(
                path = %entry.relative.display(),
                wanted,
                available = targets.len(),
                "fewer devices than replication count"
            );
        }

        let mut copies = 0;
        for target in targets {
            let destination = target.join(&entry.relative);
            match copy_file(&source, &destination).await {
                Ok(bytes) => {
                    copies += 1;
                    debug!(
                        path = %entry.relative.display(),
                        from = %entry.device,
                        to = %target,
                        bytes,
                        "replicated"
                    );
                    self.events.publish(ReplicationEvent::Replicated {
                        path: entry.relative.clone(),
                        from: entry.device.clone(),
                        to: target,
                    });
                }
                Err(source_err) => {
                    let err = ReplError::Copy {
                        path: entry.relative.clone(),
                        target: destination,
                        source: source_err,
                    };
                    return self.fail(entry, Some(target), err.to_string());
                }
            }
        }

        self.queue.lock().finish(&entry);
        TickOutcome::Replicated { copies }
    }

    // Devices already holding the path come first so a retry overwrites
    // earlier partial progress instead of spreading extra copies.
    async fn targets_for(&self, entry: &QueueEntry, wanted: usize) -> Result<Vec<Device>> {
        if wanted == 0 {
            return Ok(Vec::new());
        }
        let candidates: Vec<Device> = self
            .registry
            .pick_write_devices()?
            .into_iter()
            .filter(|d| *d != entry.device)
            .collect();
        let mut holders = Vec::new();
        let mut others = Vec::new();
        for device in candidates {
            if tokio::fs::symlink_metadata(device.join(&entry.relative))
                .await
                .is_ok()
            {
                holders.push(device);
            } else {
                others.push(device);
            }
        }
        holders.extend(others);
        holders.truncate(wanted);
        Ok(holders)
    }

    fn fail(&self, entry: QueueEntry, target: Option<Device>, message: String) -> TickOutcome {
        let attempts = entry.attempts + 1;
        warn!(
            path = %entry.relative.display(),
            attempts,
            error = %message,
            "replication failed"
        );
        if let Some(to) = target {
            self.events.publish(ReplicationEvent::CopyFailed {
                path: entry.relative.clone(),
                to,
                attempts,
                message: message.clone(),
            });
        }
        if attempts >= self.config.max_copy_attempts {
            return self.drop_entry(entry, &format!("gave up after {} attempts: {}", attempts, message));
        }
        self.queue.lock().requeue(entry);
        TickOutcome::Requeued
    }

    fn drop_entry(&self, entry: QueueEntry, reason: &str) -> TickOutcome {
        error!(path = %entry.relative.display(), reason, "dropping replication entry");
        self.queue.lock().finish(&entry);
        self.events.publish(ReplicationEvent::Dropped {
            path: entry.relative,
            reason: reason.to_string(),
        });
        TickOutcome::Dropped
    }
}

impl Availability for Replicator {
    fn is_ready(&self, device: &Device, relative: &Path) -> bool {
        Replicator::is_ready(self, device, relative)
    }
}

impl UpdateSink for Replicator {
    fn file_updated(&self, device: &Device, relative: &Path) {
        self.enqueue(device, relative);
    }

    fn file_renamed(&self, from: &Path, to: &Path) {
        self.queue.lock().rename(from, to);
        debug!(from = %from.display(), to = %to.display(), "following rename");
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("replication_count", &self.replication_count())
            .field("rebalancing", &self.is_rebalancing())
            .field("queue_len", &self.queue_len())
            .finish_non_exhaustive()
    }
}

fn spawn_worker(period: Duration, replicator: Weak<Replicator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(replicator) = replicator.upgrade() else {
                break;
            };
            replicator.tick().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use slothfs_storage::RegistryConfig;

    fn replicator(count: usize) -> Result<Replicator> {
        let registry = Arc::new(DeviceRegistry::new(RegistryConfig::new("/nonexistent")));
        Replicator::new(
            registry,
            ReplConfig {
                replication_count: count,
                ..ReplConfig::default()
            },
        )
    }

    #[test]
    fn test_default_config() {
        let config = ReplConfig::default();
        assert_eq!(config.replication_count, 2);
        assert_eq!(config.idle_interval, Duration::from_secs(1));
        assert_eq!(config.max_copy_attempts, 5);
        assert_eq!(config.walk_concurrency, 3);
    }

    #[test]
    fn test_zero_count_rejected() {
        assert!(matches!(
            replicator(0),
            Err(ReplError::InvalidReplicationCount { value: 0 })
        ));
    }

    #[test]
    fn test_rebalancing_blocks_every_device() {
        let repl = replicator(2).unwrap();
        let a = Device::new("/d/a", ".s");
        assert!(repl.is_ready(&a, Path::new("f")));
        repl.rebalancing.store(true, Ordering::SeqCst);
        assert!(!repl.is_ready(&a, Path::new("f")));
    }

    #[test]
    fn test_update_sink_enqueues() {
        let repl = replicator(2).unwrap();
        let a = Device::new("/d/a", ".s");
        let b = Device::new("/d/b", ".s");
        repl.file_updated(&a, Path::new("f"));
        assert_eq!(repl.queue_len(), 1);
        assert!(repl.is_ready(&a, Path::new("f")));
        assert!(!repl.is_ready(&b, Path::new("f")));
    }

    #[test]
    fn test_update_sink_follows_rename() {
        let repl = replicator(2).unwrap();
        let a = Device::new("/d/a", ".s");
        let b = Device::new("/d/b", ".s");
        repl.file_updated(&a, Path::new("upload.part"));
        repl.file_renamed(Path::new("upload.part"), Path::new("final.bin"));

        assert_eq!(repl.queue_len(), 1);
        assert!(!repl.is_pending(Path::new("upload.part")));
        assert!(repl.is_pending(Path::new("final.bin")));
        assert!(!repl.is_ready(&b, Path::new("final.bin")));
    }

    #[tokio::test]
    async fn test_vanished_origin_is_dropped() {
        let repl = replicator(2).unwrap();
        let mut rx = repl.subscribe();
        let a = Device::new("/nonexistent/a", ".s");
        repl.enqueue(&a, Path::new("gone.txt"));

        assert_eq!(repl.tick().await, TickOutcome::Dropped);
        assert_eq!(repl.queue_len(), 0);
        assert!(repl.is_ready(&Device::new("/nonexistent/b", ".s"), Path::new("gone.txt")));

        assert!(matches!(
            rx.try_recv().unwrap(),
            ReplicationEvent::QueueLengthChanged { length: 1 }
        ));
        assert!(matches!(rx.try_recv().unwrap(), ReplicationEvent::Dropped { .. }));
    }
}
