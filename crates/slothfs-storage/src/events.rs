//! Lifecycle events emitted by the device registry.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::device::Device;

/// Default capacity of a registry event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something observable happened in the device registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// First successful non-empty discovery. Sent once per registry.
    Ready {
        /// Devices found by that scan.
        devices: Vec<Device>,
    },
    /// A device joined the set.
    DeviceAdded {
        /// The new device.
        device: Device,
    },
    /// A device left the set.
    DeviceRemoved {
        /// The removed device.
        device: Device,
    },
    /// The aggregate used fraction changed since the last reading.
    UtilizationChanged {
        /// New used fraction, 0.0 to 1.0.
        used_fraction: f64,
        /// Total capacity in bytes.
        total_bytes: u64,
    },
    /// Non-fatal operational issue.
    Warning {
        /// Description.
        message: String,
    },
    /// Storage is not operating; the device list has been cleared.
    Error {
        /// Description.
        message: String,
    },
}

/// Per-instance publisher for registry events.
#[derive(Debug, Clone)]
pub struct EventPublisher<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventPublisher<E> {
    /// Create a publisher whose subscribers buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: E) -> usize {
        if self.sender.receiver_count() == 0 {
            return 0;
        }
        self.sender.send(event).unwrap_or(0)
    }

    /// New subscription starting at the next published event.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
