//! Daemon wiring: registry, replicator and merged filesystem in one place.

use crate::config::SlothConfig;
use anyhow::Result;
use serde::Serialize;
use slothfs_repl::{RebalanceOutcome, ReplicationEvent, Replicator};
use slothfs_storage::{
    format_bytes, format_fraction, DeviceRegistry, RegistryEvent, SkippedDevice,
};
use slothfs_vfs::MergedFs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One device in a [`ScanReport`].
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    /// Folder name under the devices path.
    pub name: String,
    /// Storage directory on the device.
    pub path: PathBuf,
    /// Filesystem size, when `df` reported the device.
    pub size_bytes: Option<u64>,
    /// Used share of the filesystem, 0.0 to 1.0.
    pub used_fraction: Option<f64>,
}

/// Result of a one-shot scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    /// Folder that was scanned.
    pub devices_path: PathBuf,
    /// Usable devices in placement order.
    pub devices: Vec<DeviceReport>,
    /// Entries that were not usable as devices, with the reason.
    pub skipped: Vec<SkippedDevice>,
    /// Combined size of every device.
    pub total_bytes: u64,
    /// `total_bytes` for humans.
    pub total: String,
    /// Size-weighted used share across devices.
    pub used_fraction: Option<f64>,
    /// `used_fraction` as a percentage.
    pub used: String,
    /// Discovery failure, if the scan could not list devices.
    pub error: Option<String>,
}

/// The running storage daemon: device registry, replicator and the merged
/// filesystem wired to both.
pub struct Application {
    config: SlothConfig,
    registry: Arc<DeviceRegistry>,
    replicator: Arc<Replicator>,
    fs: Arc<MergedFs>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Application {
    /// Build every component from `config` without starting anything.
    pub fn new(config: SlothConfig) -> Result<Self> {
        let registry = DeviceRegistry::new(config.registry_config());
        Self::with_registry(config, registry)
    }

    /// Like [`Application::new`] with a preconfigured registry.
    pub fn with_registry(config: SlothConfig, registry: DeviceRegistry) -> Result<Self> {
        config.validate()?;
        info!(
            devices_path = %config.devices_path.display(),
            replication_count = config.replication_count,
            "configuring application"
        );
        let registry = Arc::new(registry);
        let replicator = Arc::new(Replicator::new(
            Arc::clone(&registry),
            config.repl_config(),
        )?);
        let fs = Arc::new(
            MergedFs::new(Arc::clone(&registry))
                .with_availability(replicator.clone())
                .with_update_sink(replicator.clone())
                .with_config(config.fs_config()),
        );
        Ok(Self {
            config,
            registry,
            replicator,
            fs,
            forwarders: Vec::new(),
        })
    }

    /// Start event logging, then the registry loops and the replication worker.
    pub fn start(&mut self) {
        if !self.forwarders.is_empty() {
            return;
        }
        self.forwarders
            .push(forward_events(self.registry.subscribe(), log_registry_event));
        self.forwarders.push(forward_events(
            self.replicator.subscribe(),
            log_replication_event,
        ));
        self.registry.start();
        self.replicator.start();
        info!("application is ready");
    }

    /// Stop every background task.
    pub fn shutdown(&mut self) {
        info!("shutting down");
        self.replicator.shutdown();
        self.registry.shutdown();
        for task in self.forwarders.drain(..) {
            task.abort();
        }
    }

    /// Validated configuration in effect.
    pub fn config(&self) -> &SlothConfig {
        &self.config
    }

    /// Shared device registry.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Shared replicator.
    pub fn replicator(&self) -> &Arc<Replicator> {
        &self.replicator
    }

    /// The merged namespace a protocol adapter would serve.
    pub fn fs(&self) -> &Arc<MergedFs> {
        &self.fs
    }

    /// Change the replication count and re-balance existing files.
    pub async fn set_replication_count(&self, count: usize) -> Result<RebalanceOutcome> {
        info!(count, "changing replication count");
        Ok(self.replicator.set_replication_count(count).await?)
    }

    /// One discovery pass and one capacity poll.
    pub async fn scan(&self) -> ScanReport {
        let (skipped, error) = match self.registry.discover().await {
            Ok(outcome) => (outcome.skipped, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        if let Err(e) = self.registry.poll_capacity().await {
            debug!(error = %e, "scan without capacity figures");
        }

        let capacity = self.registry.capacity();
        let devices = self
            .registry
            .list_devices(true)
            .into_iter()
            .map(|device| {
                let stat = capacity.stat_for(device.root());
                DeviceReport {
                    name: device.name(),
                    path: device.path().to_path_buf(),
                    size_bytes: stat.map(|s| s.size_bytes),
                    used_fraction: stat.map(|s| s.used_fraction),
                }
            })
            .collect();

        ScanReport {
            devices_path: self.config.devices_path.clone(),
            devices,
            skipped,
            total_bytes: capacity.total_bytes,
            total: format_bytes(Some(capacity.total_bytes)),
            used_fraction: capacity.used_fraction,
            used: format_fraction(capacity.used_fraction),
            error,
        }
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        for task in self.forwarders.drain(..) {
            task.abort();
        }
    }
}

fn forward_events<E>(mut rx: broadcast::Receiver<E>, log: fn(&E)) -> JoinHandle<()>
where
    E: Clone + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_registry_event(event: &RegistryEvent) {
    match event {
        RegistryEvent::Ready { devices } => {
            info!(component = "registry", devices = devices.len(), "storage ready");
        }
        RegistryEvent::DeviceAdded { device } => {
            info!(component = "registry", device = %device, "device added");
        }
        RegistryEvent::DeviceRemoved { device } => {
            info!(component = "registry", device = %device, "device removed");
        }
        RegistryEvent::UtilizationChanged {
            used_fraction,
            total_bytes,
        } => {
            info!(
                component = "registry",
                used = %format_fraction(Some(*used_fraction)),
                total = %format_bytes(Some(*total_bytes)),
                "storage utilization changed"
            );
        }
        RegistryEvent::Warning { message } => {
            warn!(component = "registry", "{}", message);
        }
        RegistryEvent::Error { message } => {
            error!(component = "registry", "{}", message);
        }
    }
}

fn log_replication_event(event: &ReplicationEvent) {
    match event {
        ReplicationEvent::QueueLengthChanged { length } => {
            info!(component = "replicator", length, "queue length");
        }
        ReplicationEvent::Replicated { path, from, to } => {
            info!(
                component = "replicator",
                path = %path.display(),
                from = %from,
                to = %to,
                "replicated"
            );
        }
        ReplicationEvent::CopyFailed {
            path,
            to,
            attempts,
            message,
        } => {
            warn!(
                component = "replicator",
                path = %path.display(),
                to = %to,
                attempts,
                "{}",
                message
            );
        }
        ReplicationEvent::Dropped { path, reason } => {
            error!(component = "replicator", path = %path.display(), "{}", reason);
        }
        ReplicationEvent::ReplicationStarted { target } => {
            info!(component = "replicator", target, "replication started");
        }
        ReplicationEvent::ReplicationFinished { stats } => {
            info!(
                component = "replicator",
                target = stats.target,
                files = stats.files_scanned,
                added = stats.copies_added,
                removed = stats.copies_removed,
                failures = stats.failures,
                skipped_pending = stats.skipped_pending,
                "replication finished"
            );
        }
        ReplicationEvent::Warning { message } => {
            warn!(component = "replicator", "{}", message);
        }
    }
}
