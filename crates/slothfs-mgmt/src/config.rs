//! Configuration file loading and validation.

use serde::{Deserialize, Serialize};
use slothfs_repl::ReplConfig;
use slothfs_storage::{RegistryConfig, DEFAULT_STORAGE_DIR_NAME};
use slothfs_vfs::MergedFsConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlothConfig {
    /// Folder whose subfolders are the storage devices.
    pub devices_path: PathBuf,
    /// Directory created on each device to hold the namespace.
    pub storage_dir_name: String,
    /// Seconds between device scans.
    pub discovery_interval_secs: u64,
    /// Seconds between capacity polls.
    pub capacity_interval_secs: u64,
    /// Devices that should hold each file.
    pub replication_count: usize,
    /// Milliseconds between replication worker ticks.
    pub replication_interval_ms: u64,
    /// Failed copy passes before a queue entry is dropped.
    pub max_copy_attempts: u32,
    /// Devices touched at once by fan-out operations.
    pub fan_out_concurrency: usize,
    /// Directories listed at once during a re-balance walk.
    pub walk_concurrency: usize,
}

impl Default for SlothConfig {
    fn default() -> Self {
        Self {
            devices_path: PathBuf::new(),
            storage_dir_name: DEFAULT_STORAGE_DIR_NAME.to_string(),
            discovery_interval_secs: 5,
            capacity_interval_secs: 5,
            replication_count: 2,
            replication_interval_ms: 1000,
            max_copy_attempts: 5,
            fan_out_concurrency: 3,
            walk_concurrency: 3,
        }
    }
}

impl SlothConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: SlothConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: SlothConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.devices_path.as_os_str().is_empty() {
            anyhow::bail!("devices path is required");
        }
        if self.storage_dir_name.is_empty() || self.storage_dir_name.contains('/') {
            anyhow::bail!("invalid storage directory name: {:?}", self.storage_dir_name);
        }
        if self.replication_count == 0 {
            anyhow::bail!("replication count must be at least 1");
        }
        if self.discovery_interval_secs == 0
            || self.capacity_interval_secs == 0
            || self.replication_interval_ms == 0
        {
            anyhow::bail!("intervals must be non-zero");
        }
        if self.max_copy_attempts == 0 {
            anyhow::bail!("max copy attempts must be at least 1");
        }
        Ok(())
    }

    /// Settings for the device registry.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            storage_dir_name: self.storage_dir_name.clone(),
            discovery_interval: Duration::from_secs(self.discovery_interval_secs),
            capacity_interval: Duration::from_secs(self.capacity_interval_secs),
            scan_concurrency: self.fan_out_concurrency,
            ..RegistryConfig::new(&self.devices_path)
        }
    }

    /// Settings for the replicator.
    pub fn repl_config(&self) -> ReplConfig {
        ReplConfig {
            replication_count: self.replication_count,
            idle_interval: Duration::from_millis(self.replication_interval_ms),
            max_copy_attempts: self.max_copy_attempts,
            walk_concurrency: self.walk_concurrency,
        }
    }

    /// Settings for the merged filesystem.
    pub fn fs_config(&self) -> MergedFsConfig {
        MergedFsConfig {
            fan_out_concurrency: self.fan_out_concurrency,
            ..MergedFsConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = SlothConfig::default();
        assert_eq!(config.storage_dir_name, ".sloth-storage");
        assert_eq!(config.discovery_interval_secs, 5);
        assert_eq!(config.capacity_interval_secs, 5);
        assert_eq!(config.replication_count, 2);
        assert_eq!(config.replication_interval_ms, 1000);
        assert_eq!(config.max_copy_attempts, 5);
        assert_eq!(config.fan_out_concurrency, 3);
        assert!(config.devices_path.as_os_str().is_empty());
    }

    #[test]
    fn test_default_requires_devices_path() {
        assert!(SlothConfig::default().validate().is_err());
        let config = SlothConfig {
            devices_path: PathBuf::from("/mnt"),
            ..SlothConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_replication_count_invalid() {
        let config = SlothConfig {
            devices_path: PathBuf::from("/mnt"),
            replication_count: 0,
            ..SlothConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nested_storage_dir_invalid() {
        let config = SlothConfig {
            devices_path: PathBuf::from("/mnt"),
            storage_dir_name: "a/b".to_string(),
            ..SlothConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{
                "devices_path": "/media/usb",
                "replication_count": 3,
                "replication_interval_ms": 250
            }}"#
        )
        .unwrap();

        let config = SlothConfig::from_file(file.path()).unwrap();
        assert_eq!(config.devices_path, PathBuf::from("/media/usb"));
        assert_eq!(config.replication_count, 3);
        assert_eq!(config.replication_interval_ms, 250);
        assert_eq!(config.storage_dir_name, ".sloth-storage");
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
devices_path = "/srv/devices"
storage_dir_name = ".store"
discovery_interval_secs = 10
max_copy_attempts = 2
            "#
        )
        .unwrap();

        let config = SlothConfig::from_file(file.path()).unwrap();
        assert_eq!(config.devices_path, PathBuf::from("/srv/devices"));
        assert_eq!(config.storage_dir_name, ".store");
        assert_eq!(config.discovery_interval_secs, 10);
        assert_eq!(config.max_copy_attempts, 2);
        assert_eq!(config.capacity_interval_secs, 5);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(SlothConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_component_configs() {
        let config = SlothConfig {
            devices_path: PathBuf::from("/mnt"),
            replication_count: 4,
            fan_out_concurrency: 2,
            ..SlothConfig::default()
        };
        let registry = config.registry_config();
        assert_eq!(registry.devices_path, PathBuf::from("/mnt"));
        assert_eq!(registry.discovery_interval, Duration::from_secs(5));
        assert_eq!(registry.scan_concurrency, 2);

        let repl = config.repl_config();
        assert_eq!(repl.replication_count, 4);
        assert_eq!(repl.idle_interval, Duration::from_millis(1000));

        assert_eq!(config.fs_config().fan_out_concurrency, 2);
    }
}
