//! CLI configuration file
//!
//! An optional TOML file listing directories to watch and watcher settings.
//! Everything has a default, so an empty file is valid.

use anyhow::{bail, Context, Result};
use dirwatch::config::DEFAULT_BUFFER_SIZE;
use dirwatch::{WatchOptions, WatcherConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default delay between two drains of the change queue
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Milliseconds between queue drains (1-60000)
    pub poll_interval_ms: u64,

    pub watcher: WatcherConfig,

    /// Directories watched in addition to those given on the command line
    #[serde(rename = "directory")]
    pub directories: Vec<DirectoryConfig>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            watcher: WatcherConfig::default(),
            directories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub path: String,

    #[serde(default = "default_recursive")]
    pub recursive: bool,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_recursive() -> bool {
    true
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl DirectoryConfig {
    pub fn options(&self) -> WatchOptions {
        WatchOptions::new()
            .recursive(self.recursive)
            .buffer_size(self.buffer_size)
    }
}

impl CliConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 || self.poll_interval_ms > 60_000 {
            bail!(
                "poll_interval_ms must be between 1 and 60000 (got {})",
                self.poll_interval_ms
            );
        }

        self.watcher.validate()?;

        for directory in &self.directories {
            if directory.path.is_empty() {
                bail!("[[directory]] entry has an empty path");
            }
            if directory.buffer_size == 0 {
                bail!("buffer_size for {} must be positive", directory.path);
            }
        }

        Ok(())
    }
}

/// Load and validate a config file
pub fn load(path: &Path) -> Result<CliConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: CliConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    Ok(config)
}

/// Example config file with every key at its default
pub fn example_config() -> &'static str {
    r#"# dirwatch configuration

# Milliseconds between two drains of the change queue (1-60000)
poll_interval_ms = 50

[watcher]
# Records the queue holds before it first grows
queue_capacity = 16
# Name of the worker thread
thread_name = "dirwatch"

# One block per watched directory
[[directory]]
path = 'C:\data\assets'
# Also watch subdirectories
recursive = true
# Bytes per change buffer; larger bursts are reported as TooManyChanges
buffer_size = 32768
"#
}
