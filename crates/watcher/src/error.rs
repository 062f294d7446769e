//! Error types for the directory watcher.

use std::io;
use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors that can occur in the directory watcher.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The directory could not be opened for change notification.
    /// Nothing was registered and nothing was leaked.
    #[error("failed to open directory {path}: {source}")]
    OpenDirectory {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The native change source could not be created.
    #[error("failed to create change source: {0}")]
    CreateSource(#[source] io::Error),

    /// The worker thread could not be spawned.
    #[error("failed to spawn watcher thread: {0}")]
    SpawnWorker(#[source] io::Error),

    /// The worker thread has exited.
    #[error("watcher thread is no longer running")]
    WorkerDisconnected,

    /// Configuration error.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Directory walk error during a rescan.
    #[error("rescan error: {0}")]
    Walk(#[from] walkdir::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
