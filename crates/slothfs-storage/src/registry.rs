//! The device registry: authoritative list of device roots.
//!
//! Discovery and capacity polling each run on their own fixed interval once
//! [`DeviceRegistry::start`] is called, and stop together on
//! [`DeviceRegistry::shutdown`] or drop. Readers always get a snapshot of
//! the device list, either sorted or freshly shuffled.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::capacity::{
    format_bytes, format_fraction, parse_df_output, CapacityProbe, CapacitySnapshot, DfProbe,
};
use crate::device::{device_names, Device, DEFAULT_STORAGE_DIR_NAME};
use crate::discovery::{self, ScanOutcome};
use crate::error::{DiscoveryError, StorageError, StorageResult};
use crate::events::{EventPublisher, RegistryEvent, DEFAULT_EVENT_CAPACITY};
use crate::shuffle::Shuffler;

/// Default interval between discovery scans.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(5);
/// Default interval between capacity polls.
pub const DEFAULT_CAPACITY_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for a [`DeviceRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Parent directory whose subdirectories are devices.
    pub devices_path: PathBuf,
    /// Name of the reserved storage subdirectory on each device.
    pub storage_dir_name: String,
    /// Interval between discovery scans.
    pub discovery_interval: Duration,
    /// Interval between capacity polls.
    pub capacity_interval: Duration,
    /// Maximum concurrent filesystem calls during a scan.
    pub scan_concurrency: usize,
}

impl RegistryConfig {
    /// Defaults for everything except the devices path.
    pub fn new(devices_path: impl Into<PathBuf>) -> Self {
        Self {
            devices_path: devices_path.into(),
            storage_dir_name: DEFAULT_STORAGE_DIR_NAME.to_string(),
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
            capacity_interval: DEFAULT_CAPACITY_INTERVAL,
            scan_concurrency: 3,
        }
    }
}

/// Owns the device list, capacity readings and lifecycle events.
pub struct DeviceRegistry {
    config: RegistryConfig,
    devices: RwLock<Vec<Device>>,
    capacity: RwLock<CapacitySnapshot>,
    ready_sent: AtomicBool,
    probe: Arc<dyn CapacityProbe>,
    shuffler: Shuffler,
    events: EventPublisher<RegistryEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceRegistry {
    /// Create an idle registry using `df` for capacity and an entropy-seeded shuffler.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            devices: RwLock::new(Vec::new()),
            capacity: RwLock::new(CapacitySnapshot::default()),
            ready_sent: AtomicBool::new(false),
            probe: Arc::new(DfProbe),
            shuffler: Shuffler::from_entropy(),
            events: EventPublisher::new(DEFAULT_EVENT_CAPACITY),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Replace the capacity query.
    pub fn with_probe(mut self, probe: Arc<dyn CapacityProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Make every random ordering reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.shuffler = Shuffler::from_seed(seed);
        self
    }

    /// Spawn the discovery and capacity loops. The first tick of each runs immediately.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        info!(
            devices_path = %self.config.devices_path.display(),
            "starting device registry"
        );

        let weak = Arc::downgrade(self);
        tasks.push(spawn_every(
            self.config.discovery_interval,
            weak.clone(),
            discovery_tick,
        ));
        tasks.push(spawn_every(self.config.capacity_interval, weak, capacity_tick));
    }

    /// Stop both loops. In-flight filesystem calls finish on their own.
    pub fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        if !tasks.is_empty() {
            debug!("stopping device registry loops");
        }
        for task in tasks {
            task.abort();
        }
    }

    /// True while the background loops are scheduled.
    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// The configured devices path.
    pub fn devices_path(&self) -> &Path {
        &self.config.devices_path
    }

    /// The reserved storage subdirectory name.
    pub fn storage_dir_name(&self) -> &str {
        &self.config.storage_dir_name
    }

    /// Run one discovery pass and publish what changed.
    ///
    /// Errors are also published as events: an unreadable devices path is an
    /// `Error` event, an empty one a `Warning`. Either way the device list is
    /// cleared.
    pub async fn discover(&self) -> Result<ScanOutcome, DiscoveryError> {
        let previous = self.devices.read().clone();
        debug!(current = previous.len(), "looking up devices");

        let outcome = discovery::scan(
            &self.config.devices_path,
            &self.config.storage_dir_name,
            self.config.scan_concurrency,
        )
        .await;

        let outcome = match outcome {
            Ok(outcome) if !outcome.devices.is_empty() => outcome,
            Ok(outcome) => {
                self.report_skipped(&outcome);
                let err = DiscoveryError::NoDevicesFound {
                    path: self.config.devices_path.clone(),
                };
                self.clear_devices(&previous, &err);
                return Err(err);
            }
            Err(err) => {
                self.clear_devices(&previous, &err);
                return Err(err);
            }
        };

        self.report_skipped(&outcome);

        let diff = discovery::diff(&previous, &outcome.devices);
        *self.devices.write() = outcome.devices.clone();

        if !self.ready_sent.swap(true, Ordering::SeqCst) {
            info!(
                count = outcome.devices.len(),
                devices = %device_names(&outcome.devices),
                "storage is ready to operate"
            );
            self.events.publish(RegistryEvent::Ready {
                devices: outcome.devices.clone(),
            });
        }

        if !diff.removed.is_empty() {
            info!(devices = %device_names(&diff.removed), "device(s) removed");
        }
        for device in diff.removed {
            self.events.publish(RegistryEvent::DeviceRemoved { device });
        }

        if !diff.added.is_empty() {
            let created: Vec<Device> = diff
                .added
                .iter()
                .filter(|d| outcome.created.contains(d))
                .cloned()
                .collect();
            if created.len() < diff.added.len() {
                info!(
                    devices = %device_names(&diff.added),
                    "device(s) added, some with an existing storage directory"
                );
            } else {
                info!(devices = %device_names(&diff.added), "device(s) added");
            }
        }
        for device in diff.added {
            self.events.publish(RegistryEvent::DeviceAdded { device });
        }

        Ok(outcome)
    }

    fn report_skipped(&self, outcome: &ScanOutcome) {
        for skipped in &outcome.skipped {
            self.events.publish(RegistryEvent::Warning {
                message: format!(
                    "Fail to create storage directory on {:?} device, skip it in list: {}",
                    skipped.device.root(),
                    skipped.reason
                ),
            });
        }
    }

    fn clear_devices(&self, previous: &[Device], err: &DiscoveryError) {
        self.devices.write().clear();
        if err.is_fatal() {
            error!(error = %err, "storage is not operating");
            self.events.publish(RegistryEvent::Error {
                message: format!("Fail to process storage directories: {}", err),
            });
        } else {
            warn!(error = %err, "no devices found");
            self.events.publish(RegistryEvent::Warning {
                message: err.to_string(),
            });
        }
        for device in previous {
            self.events.publish(RegistryEvent::DeviceRemoved {
                device: device.clone(),
            });
        }
    }

    /// Query utilization of every registered device and publish a change event
    /// when the aggregate used fraction moved.
    pub async fn poll_capacity(&self) -> StorageResult<CapacitySnapshot> {
        let roots: Vec<PathBuf> = self
            .devices
            .read()
            .iter()
            .map(|d| d.root().to_path_buf())
            .collect();
        debug!(
            current = %format_fraction(self.capacity.read().used_fraction),
            "getting devices utilization"
        );

        let output = match self.probe.query(&roots).await {
            Ok(output) => output,
            Err(err) => {
                warn!(error = %err, "cannot get device capacities");
                self.events.publish(RegistryEvent::Warning {
                    message: format!("Fail to get device capacities: {}", err),
                });
                return Err(err);
            }
        };

        let snapshot =
            CapacitySnapshot::from_stats(parse_df_output(&output, &self.config.devices_path));
        let changed = {
            let mut current = self.capacity.write();
            let previous = current.used_fraction;
            *current = snapshot.clone();
            snapshot.used_fraction.is_some() && snapshot.used_fraction != previous
        };

        if let (true, Some(used_fraction)) = (changed, snapshot.used_fraction) {
            info!(
                used = %format_fraction(Some(used_fraction)),
                total = %format_bytes(Some(snapshot.total_bytes)),
                "storage utilization changed"
            );
            self.events.publish(RegistryEvent::UtilizationChanged {
                used_fraction,
                total_bytes: snapshot.total_bytes,
            });
        }
        Ok(snapshot)
    }

    /// Latest capacity reading.
    pub fn capacity(&self) -> CapacitySnapshot {
        self.capacity.read().clone()
    }

    /// Snapshot of the device list: sorted when `ordered`, otherwise a fresh
    /// random permutation.
    pub fn list_devices(&self, ordered: bool) -> Vec<Device> {
        let devices = self.devices.read().clone();
        if ordered {
            devices
        } else {
            self.shuffler.shuffled(&devices)
        }
    }

    /// Number of registered devices.
    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    /// Write candidates, best first.
    ///
    /// When more than one device has capacity stats they are ranked by
    /// ascending used fraction and the devices without stats follow in random
    /// order. Otherwise the whole list is shuffled.
    pub fn pick_write_devices(&self) -> StorageResult<Vec<Device>> {
        let devices = self.devices.read().clone();
        if devices.is_empty() {
            return Err(StorageError::NoDevicesAvailable);
        }

        let capacity = self.capacity.read();
        let (mut ranked, mut rest): (Vec<_>, Vec<_>) = devices
            .into_iter()
            .map(|d| {
                let used = capacity.stat_for(d.root()).map(|s| s.used_fraction);
                (d, used)
            })
            .partition(|(_, used)| used.is_some());
        drop(capacity);

        if ranked.len() <= 1 {
            let mut all: Vec<Device> = ranked.into_iter().chain(rest).map(|(d, _)| d).collect();
            self.shuffler.shuffle(&mut all);
            return Ok(all);
        }

        ranked.sort_by(|a, b| {
            a.1.unwrap_or(1.0)
                .total_cmp(&b.1.unwrap_or(1.0))
        });
        self.shuffler.shuffle(&mut rest);
        Ok(ranked.into_iter().chain(rest).map(|(d, _)| d).collect())
    }

    /// The single best write candidate.
    pub fn pick_write_device(&self) -> StorageResult<Device> {
        self.pick_write_devices()?
            .into_iter()
            .next()
            .ok_or(StorageError::NoDevicesAvailable)
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices_path", &self.config.devices_path)
            .field("devices", &self.devices.read().len())
            .finish_non_exhaustive()
    }
}

type TickFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

// Failures are already published as events by the calls themselves.
fn discovery_tick(registry: Arc<DeviceRegistry>) -> TickFuture {
    Box::pin(async move {
        let _ = registry.discover().await;
    })
}

fn capacity_tick(registry: Arc<DeviceRegistry>) -> TickFuture {
    Box::pin(async move {
        let _ = registry.poll_capacity().await;
    })
}

fn spawn_every(
    period: Duration,
    registry: Weak<DeviceRegistry>,
    tick: fn(Arc<DeviceRegistry>) -> TickFuture,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(registry) = registry.upgrade() else {
                break;
            };
            tick(registry).await;
        }
    })
}
