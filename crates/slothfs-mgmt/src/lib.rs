#![warn(missing_docs)]

//! SlothFS management subsystem: configuration, logging, CLI and daemon wiring

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;

pub use app::{Application, DeviceReport, ScanReport};
pub use config::SlothConfig;
pub use logging::init_tracing;
