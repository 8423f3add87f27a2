//! Command line interface of the `sloth-storage` binary.

use crate::config::SlothConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "sloth-storage")]
#[command(about = "Merge a folder of storage devices into one replicated namespace", long_about = None)]
#[command(version)]
pub struct Cli {
    /// TOML or JSON configuration file.
    #[arg(short, long, global = true, env = "SLOTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use the folders in this path as devices.
    #[arg(short = 'D', long, global = true, env = "SLOTH_DEVICES_PATH")]
    pub devices_path: Option<PathBuf>,

    /// Devices that should hold each file.
    #[arg(short = 'R', long, global = true)]
    pub replication_count: Option<usize>,

    /// Directory created on each device for the namespace.
    #[arg(long, global = true)]
    pub storage_dir_name: Option<String>,

    /// Used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of `sloth-storage`.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run discovery, capacity polling and replication until interrupted.
    Run,
    /// Scan the devices path once and print a JSON report.
    Scan,
}

impl Cli {
    /// Config file (if any) with command line overrides applied, validated.
    pub fn load_config(&self) -> Result<SlothConfig> {
        let mut config = match &self.config {
            Some(path) => SlothConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => SlothConfig::default(),
        };
        if let Some(path) = &self.devices_path {
            config.devices_path = path.clone();
        }
        if let Some(count) = self.replication_count {
            config.replication_count = count;
        }
        if let Some(name) = &self.storage_dir_name {
            config.storage_dir_name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "sloth-storage",
            "run",
            "-D",
            "/media",
            "--replication-count",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.command, Command::Run);
        let config = cli.load_config().unwrap();
        assert_eq!(config.devices_path, PathBuf::from("/media"));
        assert_eq!(config.replication_count, 3);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_missing_devices_path_rejected() {
        let cli = Cli::try_parse_from(["sloth-storage", "scan"]).unwrap();
        assert_eq!(cli.command, Command::Scan);
        if std::env::var_os("SLOTH_DEVICES_PATH").is_none() {
            assert!(cli.load_config().is_err());
        }
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "devices_path = \"/from/file\"\nreplication_count = 4").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let cli = Cli::try_parse_from(["sloth-storage", "--config", path.as_str(), "run", "-R", "1"])
            .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.devices_path, PathBuf::from("/from/file"));
        assert_eq!(config.replication_count, 1);
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        assert!(Cli::try_parse_from(["sloth-storage", "mount"]).is_err());
    }
}
