#![warn(missing_docs)]

//! SlothFS merged filesystem: one namespace over every storage device
//!
//! Paths are resolved against the device list held by a
//! [`slothfs_storage::DeviceRegistry`]. Whether a physical copy may be read is
//! decided by an [`Availability`] predicate, and completed writes are reported
//! to an [`UpdateSink`]; the replication engine supplies both.

pub mod error;
pub mod hooks;
pub mod merged;
pub mod path;
pub mod stream;

pub use error::{FsError, Result};
pub use hooks::{AlwaysReady, Availability, DiscardUpdates, UpdateSink};
pub use merged::{MergedFs, MergedFsConfig, Resolved};
pub use path::relative_path;
pub use stream::WriteStream;
