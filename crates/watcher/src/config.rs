//! Configuration types for the watcher and individual watches.

use crate::error::{Result, WatchError};
use crate::queue::INITIAL_CAPACITY;
use serde::{Deserialize, Serialize};

/// Default size of each of a watch's two change buffers, in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Default name of the worker thread
pub const DEFAULT_THREAD_NAME: &str = "dirwatch";

/// How a single directory is watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Also report changes in all subdirectories.
    pub recursive: bool,

    /// Size of each change buffer. A burst of changes larger than this is
    /// reported as a single `TooManyChanges` record.
    pub buffer_size: usize,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether subdirectories are watched.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set the change buffer size.
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Watcher-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Records the event queue holds before its first grow.
    pub queue_capacity: usize,

    /// Name given to the worker thread.
    pub thread_name: String,
}

impl WatcherConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(WatchError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(WatchError::InvalidConfig(
                "thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: INITIAL_CAPACITY,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}
