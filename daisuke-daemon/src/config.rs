//! Configuration file loading and management
//!
//! This module handles loading and parsing the daemon configuration from
//! `$XDG_CONFIG_HOME/daisuke/config.toml`. If the configuration file doesn't
//! exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for `daemon.update_interval_minutes` (one week)
pub const MAX_UPDATE_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Daemon-specific configuration
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Library store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Library update behaviour
    #[serde(default)]
    pub updates: UpdatesConfig,
    /// Runner discovery
    #[serde(default)]
    pub runners: RunnersConfig,
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
    /// Minutes between background library updates
    /// Default: 60
    pub update_interval_minutes: u64,
    /// Developer mode: untruncated log messages and remote log forwarding
    /// Default: false
    pub developer_mode: bool,
    /// Address log entries are POSTed to in developer mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_address: Option<String>,
}

/// Library store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the library database (SQLite)
    /// If None, uses XDG_DATA_HOME/daisuke/library.db
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Library update configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpdatesConfig {
    /// Only update entries flagged "reading" (otherwise also "unknown")
    /// Default: false
    pub selective: bool,
    /// Check linked titles on other sources for updates
    /// Default: false
    pub check_linked: bool,
}

/// Runner discovery configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnersConfig {
    /// Extra directory scanned for runners before the user runners directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Only scan `directory`, never the user runners directory
    /// Default: false
    pub skip_user_directory: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            update_interval_minutes: 60,
            developer_mode: false,
            log_address: None,
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Returns `$XDG_CONFIG_HOME/daisuke/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    fn default_config_content() -> String {
        r#"# Daisuke Daemon Configuration
# This file configures the daisuke-daemon behavior.

[daemon]
# Log level: trace, debug, info, warn, error
# Default: "info"
log_level = "info"

# Minutes between background library updates
# Default: 60
update_interval_minutes = 60

# Developer mode keeps long log messages intact and, together with
# log_address, forwards every log entry to a development server.
# Default: false
developer_mode = false
# log_address = "http://192.168.1.20:9090"

[store]
# Path to the SQLite library database
# If not specified, defaults to $XDG_DATA_HOME/daisuke/library.db
# path = "/path/to/library.db"

[updates]
# Only check titles flagged as "reading". When false, titles with an
# unknown flag are checked as well.
# Default: false
selective = false

# Also look for new chapters on linked titles from other sources
# Default: false
check_linked = false

[runners]
# Extra directory to scan for runners, searched before
# $XDG_DATA_HOME/daisuke/runners
# directory = "/path/to/runners"

# Scan only the directory above
# Default: false
skip_user_directory = false
"#
        .to_string()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.daemon.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.daemon.log_level,
                valid_log_levels.join(", ")
            );
        }

        if self.daemon.update_interval_minutes == 0 {
            anyhow::bail!("daemon.update_interval_minutes must be greater than 0");
        }

        if self.daemon.update_interval_minutes > MAX_UPDATE_INTERVAL_MINUTES {
            anyhow::bail!(
                "daemon.update_interval_minutes must be at most {}",
                MAX_UPDATE_INTERVAL_MINUTES
            );
        }

        if let Some(address) = &self.daemon.log_address {
            reqwest::Url::parse(address)
                .with_context(|| format!("Invalid log_address: {}", address))?;
        }

        Ok(())
    }

    /// Get the library database path
    ///
    /// Returns the configured path or the default XDG data directory path
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.store.path {
            return Ok(path.clone());
        }

        Ok(project_dirs()?.data_dir().join("library.db"))
    }

    /// Get the application log file path
    pub fn log_path(&self) -> Result<PathBuf> {
        Ok(project_dirs()?.data_dir().join("application_logs.txt"))
    }

    /// Directories to scan for runners, in priority order
    pub fn runner_dirs(&self) -> Vec<PathBuf> {
        self.runners.directory.iter().cloned().collect()
    }

    /// Time between background library updates
    pub fn update_interval(&self) -> Result<Duration> {
        self.daemon
            .update_interval_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .context("daemon.update_interval_minutes is too large")
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "raibid-labs", "daisuke")
        .context("Failed to determine project directories")
}
