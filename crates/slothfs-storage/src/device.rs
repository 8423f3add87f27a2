//! Storage device value type.
//!
//! A device is a directory under the devices path (usually a mount point) that
//! holds a reserved storage subdirectory. All managed files live inside that
//! subdirectory, isolated from anything else on the mount.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default name of the reserved storage subdirectory created on every device.
pub const DEFAULT_STORAGE_DIR_NAME: &str = ".sloth-storage";

/// A storage root participating in the merged namespace.
///
/// Devices order and compare by their storage path, which gives the
/// deterministic ordering used by `DeviceRegistry::list_devices(true)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Device {
    path: PathBuf,
    root: PathBuf,
}

impl Device {
    /// Build a device from its root directory and the reserved subdirectory name.
    pub fn new(root: impl Into<PathBuf>, storage_dir_name: &str) -> Self {
        let root = root.into();
        Self {
            path: root.join(storage_dir_name),
            root,
        }
    }

    /// The reserved storage directory: the base of every physical path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The discovered device directory (the capacity query target).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Short human readable name: the last component of the root.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.display().to_string())
    }

    /// Physical path of a namespace-relative path on this device.
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        if relative.as_os_str().is_empty() {
            self.path.clone()
        } else {
            self.path.join(relative)
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Comma separated device names for log lines.
pub fn device_names(devices: &[Device]) -> String {
    devices
        .iter()
        .map(Device::name)
        .collect::<Vec<_>>()
        .join(", ")
}
