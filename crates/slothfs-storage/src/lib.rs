#![warn(missing_docs)]

//! SlothFS storage subsystem: device discovery, capacity polling, write placement
//!
//! This crate owns the authoritative list of storage devices. Devices are the
//! directories under a configured devices path; each holds a reserved storage
//! subdirectory where managed files live. The registry rescans the devices
//! path and polls utilization on fixed intervals, publishing lifecycle events
//! to per-instance subscribers.

pub mod capacity;
pub mod device;
pub mod discovery;
pub mod error;
pub mod events;
pub mod registry;
pub mod shuffle;

pub use capacity::{
    format_bytes, format_fraction, parse_df_output, CapacityProbe, CapacitySnapshot, CapacityStat,
    DfProbe, StaticProbe,
};
pub use device::{Device, DEFAULT_STORAGE_DIR_NAME};
pub use discovery::{DeviceDiff, ScanOutcome, SkippedDevice};
pub use error::{DiscoveryError, DiscoveryPhase, StorageError, StorageResult};
pub use events::{EventPublisher, RegistryEvent};
pub use registry::{DeviceRegistry, RegistryConfig};
pub use shuffle::{fisher_yates, Shuffler};
