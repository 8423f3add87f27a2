//! The merged filesystem: one logical namespace over every device.
//!
//! A logical path maps to the same relative path under each device's storage
//! directory. Lookups probe devices in random order and take the first copy
//! that exists and is ready; mutations that must hit every copy fan out over
//! the sorted device list with bounded concurrency and succeed if any device
//! succeeded.

use std::ffi::OsString;
use std::fs::Metadata;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use slothfs_storage::{Device, DeviceRegistry};
use tokio::fs::{self, File};
use tracing::{debug, warn};

use crate::error::{FsError, Result};
use crate::hooks::{AlwaysReady, Availability, DiscardUpdates, UpdateSink};
use crate::path::relative_path;
use crate::stream::WriteStream;

/// Tuning for [`MergedFs`].
#[derive(Debug, Clone)]
pub struct MergedFsConfig {
    /// Maximum devices touched at once by a fan-out operation.
    pub fan_out_concurrency: usize,
    /// Mode of intermediate directories created by writes and renames.
    pub dir_mode: u32,
}

impl Default for MergedFsConfig {
    fn default() -> Self {
        Self {
            fan_out_concurrency: 3,
            dir_mode: 0o777,
        }
    }
}

/// A logical path pinned to one physical copy.
#[derive(Debug)]
pub struct Resolved {
    /// Device holding the copy.
    pub device: Device,
    /// Absolute path of the copy on that device.
    pub physical: PathBuf,
    /// Metadata read during resolution.
    pub metadata: Metadata,
}

/// File operations over the merged namespace of a [`DeviceRegistry`].
pub struct MergedFs {
    registry: Arc<DeviceRegistry>,
    availability: Arc<dyn Availability>,
    updates: Arc<dyn UpdateSink>,
    config: MergedFsConfig,
}

impl MergedFs {
    /// Every copy readable, write notifications discarded.
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            availability: Arc::new(AlwaysReady),
            updates: Arc::new(DiscardUpdates),
            config: MergedFsConfig::default(),
        }
    }

    /// Consult `availability` before serving any copy.
    pub fn with_availability(mut self, availability: Arc<dyn Availability>) -> Self {
        self.availability = availability;
        self
    }

    /// Report completed writes and renames to `updates`.
    pub fn with_update_sink(mut self, updates: Arc<dyn UpdateSink>) -> Self {
        self.updates = updates;
        self
    }

    /// Replace the default tuning.
    pub fn with_config(mut self, config: MergedFsConfig) -> Self {
        self.config = config;
        self
    }

    /// The device registry backing this namespace.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Current tuning.
    pub fn config(&self) -> &MergedFsConfig {
        &self.config
    }

    /// Namespace-relative form of `logical`.
    pub fn relative_path(&self, logical: impl AsRef<Path>) -> Result<PathBuf> {
        relative_path(self.registry.devices_path(), logical.as_ref())
    }

    /// Find a ready physical copy of `logical`, following symlinks.
    pub async fn resolve(&self, logical: impl AsRef<Path>) -> Result<Resolved> {
        let logical = logical.as_ref();
        let relative = self.relative_path(logical)?;
        self.lookup(&relative, true)
            .await
            .ok_or_else(|| FsError::not_found(logical))
    }

    /// Whether `logical` resolves. Never fails.
    pub async fn exists(&self, logical: impl AsRef<Path>) -> bool {
        self.resolve(logical).await.is_ok()
    }

    /// Metadata of the resolved copy, following symlinks.
    pub async fn stat(&self, logical: impl AsRef<Path>) -> Result<Metadata> {
        Ok(self.resolve(logical).await?.metadata)
    }

    /// Like [`MergedFs::stat`] without following a final symlink.
    pub async fn lstat(&self, logical: impl AsRef<Path>) -> Result<Metadata> {
        let logical = logical.as_ref();
        let relative = self.relative_path(logical)?;
        self.lookup(&relative, false)
            .await
            .map(|r| r.metadata)
            .ok_or_else(|| FsError::not_found(logical))
    }

    /// Create a directory on the best write candidate.
    ///
    /// Missing intermediate directories on that device are created, but the
    /// logical parent itself must already resolve somewhere.
    pub async fn mkdir(&self, logical: impl AsRef<Path>, mode: u32) -> Result<()> {
        let logical = logical.as_ref();
        let relative = self.relative_path(logical)?;
        self.ensure_absent(logical, &relative).await?;
        self.ensure_parent(logical, &relative).await?;

        let device = self.registry.pick_write_device()?;
        let physical = device.join(&relative);
        create_dir_all(&physical, mode)
            .await
            .map_err(|e| FsError::from_io(e, logical))?;
        debug!(device = %device, path = %relative.display(), "created directory");
        Ok(())
    }

    /// Names in the directory across all devices, each listed once, in
    /// device order.
    pub async fn readdir(&self, logical: impl AsRef<Path>) -> Result<Vec<OsString>> {
        let logical = logical.as_ref();
        let relative = self.relative_path(logical)?;
        let listings = self
            .fan_out("readdir", logical, &relative, |_, physical| {
                read_names(physical)
            })
            .await?;

        let mut names: Vec<OsString> = Vec::new();
        for name in listings.into_iter().flatten() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Rename `from` to `to` on every device that holds `from`.
    pub async fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        let (from, to) = (from.as_ref(), to.as_ref());
        let rel_from = self.relative_path(from)?;
        let rel_to = self.relative_path(to)?;

        if let Some(dest) = self.lookup(&rel_to, true).await {
            if dest.metadata.is_dir() {
                return Err(FsError::NotEmpty {
                    path: to.to_path_buf(),
                });
            }
        }

        let dir_mode = self.config.dir_mode;
        let renamed = self
            .fan_out("rename", from, &rel_from, |device, source| {
                let target = device.join(&rel_to);
                async move {
                    fs::symlink_metadata(&source).await?;
                    if let Some(parent) = target.parent() {
                        create_dir_all(parent, dir_mode).await?;
                    }
                    fs::rename(&source, &target).await
                }
            })
            .await?;
        debug!(
            from = %rel_from.display(),
            to = %rel_to.display(),
            devices = renamed.len(),
            "renamed"
        );
        self.updates.file_renamed(&rel_from, &rel_to);
        Ok(())
    }

    /// Remove the directory from every device that has it.
    pub async fn rmdir(&self, logical: impl AsRef<Path>) -> Result<()> {
        let logical = logical.as_ref();
        let relative = self.relative_path(logical)?;
        self.fan_out("rmdir", logical, &relative, |_, physical| async move {
            fs::remove_dir(&physical).await
        })
        .await?;
        Ok(())
    }

    /// Remove every copy of a file.
    pub async fn unlink(&self, logical: impl AsRef<Path>) -> Result<()> {
        let logical = logical.as_ref();
        let relative = self.relative_path(logical)?;
        self.fan_out("unlink", logical, &relative, |_, physical| async move {
            fs::remove_file(&physical).await
        })
        .await?;
        Ok(())
    }

    /// Contents of the first ready copy that reads successfully.
    pub async fn read_file(&self, logical: impl AsRef<Path>) -> Result<Vec<u8>> {
        let logical = logical.as_ref();
        let relative = self.relative_path(logical)?;
        for device in self.registry.list_devices(false) {
            if !self.availability.is_ready(&device, &relative) {
                continue;
            }
            match fs::read(device.join(&relative)).await {
                Ok(data) => return Ok(data),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(device = %device, path = %relative.display(), error = %e, "read failed");
                }
            }
        }
        Err(FsError::not_found(logical))
    }

    /// Write a new file to one device and report it for replication.
    ///
    /// Returns the device that received the data.
    pub async fn write_file(&self, logical: impl AsRef<Path>, data: &[u8]) -> Result<Device> {
        let logical = logical.as_ref();
        let (device, physical, relative) = self.prepare_write(logical).await?;
        fs::write(&physical, data)
            .await
            .map_err(|e| FsError::from_io(e, logical))?;
        debug!(device = %device, path = %relative.display(), bytes = data.len(), "wrote file");
        self.updates.file_updated(&device, &relative);
        Ok(device)
    }

    /// Open the first ready copy for reading.
    pub async fn create_read_stream(&self, logical: impl AsRef<Path>) -> Result<File> {
        let logical = logical.as_ref();
        let resolved = self.resolve(logical).await?;
        File::open(&resolved.physical)
            .await
            .map_err(|e| FsError::from_io(e, logical))
    }

    /// Like [`MergedFs::write_file`], but streaming. The update sink is
    /// notified when the returned stream is shut down.
    pub async fn create_write_stream(&self, logical: impl AsRef<Path>) -> Result<WriteStream> {
        let logical = logical.as_ref();
        let (device, physical, relative) = self.prepare_write(logical).await?;
        let file = File::create(&physical)
            .await
            .map_err(|e| FsError::from_io(e, logical))?;
        Ok(WriteStream::new(
            file,
            device,
            relative,
            Arc::clone(&self.updates),
        ))
    }

    async fn prepare_write(&self, logical: &Path) -> Result<(Device, PathBuf, PathBuf)> {
        let relative = self.relative_path(logical)?;
        self.ensure_absent(logical, &relative).await?;
        self.ensure_parent(logical, &relative).await?;

        let device = self.registry.pick_write_device()?;
        let physical = device.join(&relative);
        if let Some(parent) = physical.parent() {
            create_dir_all(parent, self.config.dir_mode)
                .await
                .map_err(|e| FsError::from_io(e, logical))?;
        }
        Ok((device, physical, relative))
    }

    // Directories are always ready; only file copies can be mid-replication.
    async fn lookup(&self, relative: &Path, follow: bool) -> Option<Resolved> {
        for device in self.registry.list_devices(false) {
            let physical = device.join(relative);
            let metadata = if follow {
                fs::metadata(&physical).await
            } else {
                fs::symlink_metadata(&physical).await
            };
            let Ok(metadata) = metadata else {
                continue;
            };
            if metadata.is_dir() || self.availability.is_ready(&device, relative) {
                return Some(Resolved {
                    device,
                    physical,
                    metadata,
                });
            }
        }
        None
    }

    // Existence on any device, ready or not, so a pending copy is never
    // shadowed by a second write.
    async fn ensure_absent(&self, logical: &Path, relative: &Path) -> Result<()> {
        if relative.as_os_str().is_empty() {
            return Err(FsError::AlreadyExists {
                path: logical.to_path_buf(),
            });
        }
        for device in self.registry.list_devices(true) {
            if fs::symlink_metadata(device.join(relative)).await.is_ok() {
                return Err(FsError::AlreadyExists {
                    path: logical.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    async fn ensure_parent(&self, logical: &Path, relative: &Path) -> Result<()> {
        let Some(parent) = relative.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        for ancestor in parent.ancestors().filter(|p| !p.as_os_str().is_empty()) {
            let Some(found) = self.lookup(ancestor, true).await else {
                continue;
            };
            if !found.metadata.is_dir() {
                return Err(FsError::NotADirectory {
                    path: logical.to_path_buf(),
                });
            }
            if ancestor == parent {
                return Ok(());
            }
            break;
        }
        Err(FsError::not_found(parent))
    }

    async fn fan_out<T, F, Fut>(
        &self,
        op: &'static str,
        logical: &Path,
        relative: &Path,
        f: F,
    ) -> Result<Vec<T>>
    where
        F: Fn(Device, PathBuf) -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        let devices = self.registry.list_devices(true);
        if devices.is_empty() {
            return Err(FsError::NoDevicesAvailable);
        }
        let results: Vec<(Device, io::Result<T>)> = stream::iter(devices)
            .map(|device| {
                let pending = f(device.clone(), device.join(relative));
                async move { (device, pending.await) }
            })
            .buffered(self.config.fan_out_concurrency.max(1))
            .collect()
            .await;
        settle(op, logical, results)
    }
}

impl std::fmt::Debug for MergedFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergedFs")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn create_dir_all(path: &Path, mode: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path).await
}

async fn read_names(dir: PathBuf) -> io::Result<Vec<OsString>> {
    let mut entries = fs::read_dir(&dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name());
    }
    Ok(names)
}

/// Any-of: succeed with every per-device value if at least one device
/// succeeded. Otherwise report the first real failure, or `NotFound` when no
/// device had the entry.
fn settle<T>(
    op: &'static str,
    logical: &Path,
    results: Vec<(Device, io::Result<T>)>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    let mut failure = None;
    for (device, result) in results {
        match result {
            Ok(value) => values.push(value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(op, device = %device, path = %logical.display(), error = %e, "device operation failed");
                if failure.is_none() {
                    failure = Some(FsError::from_io(e, logical));
                }
            }
        }
    }
    if !values.is_empty() {
        return Ok(values);
    }
    Err(failure.unwrap_or_else(|| FsError::not_found(logical)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(name: &str) -> Device {
        Device::new(format!("/d/{}", name), ".s")
    }

    #[test]
    fn test_settle_any_success_wins() {
        let results = vec![
            (dev("a"), Err(io::Error::from(io::ErrorKind::NotFound))),
            (dev("b"), Ok(2)),
            (dev("c"), Err(io::Error::from_raw_os_error(libc::EACCES))),
        ];
        assert_eq!(settle("t", Path::new("x"), results).unwrap(), vec![2]);
    }

    #[test]
    fn test_settle_all_missing_is_not_found() {
        let results: Vec<(Device, io::Result<()>)> = vec![
            (dev("a"), Err(io::Error::from(io::ErrorKind::NotFound))),
            (dev("b"), Err(io::Error::from(io::ErrorKind::NotFound))),
        ];
        assert!(settle("t", Path::new("x"), results).unwrap_err().is_not_found());
    }

    #[test]
    fn test_settle_reports_first_real_failure() {
        let results: Vec<(Device, io::Result<()>)> = vec![
            (dev("a"), Err(io::Error::from(io::ErrorKind::NotFound))),
            (dev("b"), Err(io::Error::from_raw_os_error(libc::ENOTEMPTY))),
            (dev("c"), Err(io::Error::from_raw_os_error(libc::EACCES))),
        ];
        let err = settle("t", Path::new("x"), results).unwrap_err();
        assert!(matches!(err, FsError::NotEmpty { .. }));
    }

    #[test]
    fn test_default_config() {
        let config = MergedFsConfig::default();
        assert_eq!(config.fan_out_concurrency, 3);
        assert_eq!(config.dir_mode, 0o777);
    }
}
