//! Device capacity polling.
//!
//! Utilization comes from the OS `df` utility, scoped to mounts under the
//! devices path. Output is whitespace-delimited `target size percent%` rows
//! after a header line; sizes are 1K blocks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Arguments passed to `df` for a capacity query.
pub const DF_ARGS: [&str; 2] = ["-kl", "--output=target,size,pcent"];

/// Utilization of one mount point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityStat {
    /// Mount size in bytes.
    pub size_bytes: u64,
    /// Used fraction, 0.0 to 1.0.
    pub used_fraction: f64,
}

/// Aggregated utilization across every mount under the devices path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    /// Per-mount stats keyed by mount target.
    pub stats: BTreeMap<PathBuf, CapacityStat>,
    /// Sum of all mount sizes in bytes.
    pub total_bytes: u64,
    /// Size-weighted used fraction, `None` until a non-empty reading exists.
    pub used_fraction: Option<f64>,
}

impl CapacitySnapshot {
    /// Aggregate a set of per-mount stats.
    pub fn from_stats(stats: BTreeMap<PathBuf, CapacityStat>) -> Self {
        let total_bytes: u64 = stats.values().map(|s| s.size_bytes).sum();
        let used_bytes: f64 = stats
            .values()
            .map(|s| s.size_bytes as f64 * s.used_fraction)
            .sum();
        let used_fraction = if total_bytes > 0 {
            Some(used_bytes / total_bytes as f64)
        } else {
            None
        };
        Self {
            stats,
            total_bytes,
            used_fraction,
        }
    }

    /// Stats for a device root, if the query reported its mount.
    pub fn stat_for(&self, root: &Path) -> Option<&CapacityStat> {
        self.stats.get(root)
    }
}

/// Parse `df --output=target,size,pcent` output.
///
/// The header line is skipped and only rows whose target starts with
/// `devices_path` are kept. Malformed rows are ignored.
pub fn parse_df_output(output: &str, devices_path: &Path) -> BTreeMap<PathBuf, CapacityStat> {
    let prefix = devices_path.to_string_lossy();
    let mut stats = BTreeMap::new();

    for line in output.lines().skip(1) {
        let mut cols = line.split_whitespace();
        let (Some(target), Some(size), Some(pcent)) = (cols.next(), cols.next(), cols.next())
        else {
            continue;
        };
        if !target.starts_with(prefix.as_ref()) {
            continue;
        }
        let Ok(size_kb) = size.parse::<u64>() else {
            continue;
        };
        let Ok(percent) = pcent.trim_end_matches('%').parse::<f64>() else {
            continue;
        };
        stats.insert(
            PathBuf::from(target),
            CapacityStat {
                size_bytes: size_kb * 1024,
                used_fraction: percent / 100.0,
            },
        );
    }

    debug!(mounts = stats.len(), "parsed capacity query output");
    stats
}

/// Source of raw capacity query output.
#[async_trait]
pub trait CapacityProbe: Send + Sync {
    /// Run the query and return its raw stdout.
    async fn query(&self, devices: &[PathBuf]) -> StorageResult<String>;
}

/// Runs `df` against the registered device roots.
#[derive(Debug, Clone, Default)]
pub struct DfProbe;

#[async_trait]
impl CapacityProbe for DfProbe {
    async fn query(&self, devices: &[PathBuf]) -> StorageResult<String> {
        let output = tokio::process::Command::new("df")
            .args(DF_ARGS)
            .args(devices)
            .output()
            .await
            .map_err(|e| StorageError::CapacityQuery {
                reason: format!("cannot run df: {}", e),
            })?;

        if !output.status.success() {
            return Err(StorageError::CapacityQuery {
                reason: format!(
                    "df exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Returns fixed output. Used in tests and on hosts without `df`.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    output: Option<String>,
}

impl StaticProbe {
    /// A probe that always returns `output`.
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
        }
    }

    /// A probe that always fails.
    pub fn failing() -> Self {
        Self { output: None }
    }
}

#[async_trait]
impl CapacityProbe for StaticProbe {
    async fn query(&self, _devices: &[PathBuf]) -> StorageResult<String> {
        self.output.clone().ok_or_else(|| StorageError::CapacityQuery {
            reason: "static probe configured to fail".to_string(),
        })
    }
}

const SIZE_UNITS: [&str; 9] = ["B", "Kb", "Mb", "Gb", "Tb", "Pb", "Eb", "Zb", "Yb"];

/// Render a byte count with a short unit, keeping about four significant characters.
pub fn format_bytes(bytes: Option<u64>) -> String {
    let Some(bytes) = bytes else {
        return "N/A".to_string();
    };

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 {
        value /= 1024.0;
        unit += 1;
    }

    let Some(suffix) = SIZE_UNITS.get(unit) else {
        return "N/A".to_string();
    };
    if bytes == 0 {
        format!("0{}", suffix)
    } else if value < 10.0 {
        format!("{:.*}{}", 4usize.saturating_sub(suffix.len()), value, suffix)
    } else if value < 100.0 {
        format!("{:.*}{}", 3usize.saturating_sub(suffix.len()), value, suffix)
    } else {
        format!("{:.0}{}", value, suffix)
    }
}

/// Render a used fraction as a percentage.
pub fn format_fraction(fraction: Option<f64>) -> String {
    match fraction {
        Some(f) => format!("{:.1}%", f * 100.0),
        None => "N/A".to_string(),
    }
}
