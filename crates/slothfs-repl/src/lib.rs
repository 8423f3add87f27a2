#![warn(missing_docs)]

//! SlothFS replication subsystem: replicate-out queue, read availability, replication factor re-balancing
//!
//! Writes land on a single device. The [`Replicator`] receives each completed
//! write, copies the file out to more devices in the background, and hides
//! the not-yet-complete copies from readers until it is done. Changing the
//! replication count re-balances every existing file.

pub mod copy;
pub mod engine;
pub mod error;
pub mod events;
pub mod queue;
pub mod rebalance;

pub use copy::copy_file;
pub use engine::{ReplConfig, Replicator, TickOutcome};
pub use error::{ReplError, Result};
pub use events::{RebalanceStats, ReplicationEvent};
pub use queue::{QueueEntry, ReplicationQueue};
pub use rebalance::{walk, HolderMap, RebalanceOutcome};
