//! Watcher facade: lifecycle and the consumer-facing API

use crate::change::FileChange;
use crate::config::{WatchOptions, WatcherConfig};
use crate::error::{Result, WatchError};
use crate::path::WatchPath;
use crate::queue::EventQueue;
use crate::request::WatchRequest;
use crate::source::ChangeSource;
use crate::worker::{Job, Worker};
use crossbeam_channel::{unbounded, Sender};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Watches directories on a dedicated thread and queues their changes
///
/// Add directories with [`Watcher::add_directory`], then call
/// [`Watcher::try_get_next_change`] from your update loop until it returns
/// `None`. Dropping the watcher (or calling [`Watcher::shut_down`]) cancels
/// every watch and joins the worker thread.
pub struct Watcher<S: ChangeSource> {
    source: Arc<S>,
    queue: Arc<EventQueue>,
    jobs: Option<Sender<Job<S::Directory>>>,
    worker: Option<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl<S: ChangeSource> Watcher<S> {
    /// Start an idle worker thread driving `source`
    pub fn with_source(source: S, config: WatcherConfig) -> Result<Self> {
        config.validate()?;

        let source = Arc::new(source);
        let queue = Arc::new(EventQueue::with_capacity(config.queue_capacity));
        let active = Arc::new(AtomicUsize::new(0));
        let (jobs_tx, jobs_rx) = unbounded();

        let worker = Worker::new(
            Arc::clone(&source),
            jobs_rx,
            Arc::clone(&queue),
            Arc::clone(&active),
        );
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker.run())
            .map_err(WatchError::SpawnWorker)?;

        Ok(Self {
            source,
            queue,
            jobs: Some(jobs_tx),
            worker: Some(handle),
            active,
        })
    }

    /// Watch `directory` and all of its subdirectories with a 32 KiB buffer
    ///
    /// See [`Watcher::add_directory_with`].
    pub fn add_directory(&self, directory: impl AsRef<str>) -> Result<()> {
        self.add_directory_with(directory, WatchOptions::default())
    }

    /// Watch `directory` with explicit options
    ///
    /// The directory is opened before this returns; reading starts shortly
    /// after on the worker thread. The only error is a directory that cannot
    /// be opened, in which case nothing is registered.
    ///
    /// # Panics
    ///
    /// If `directory` is empty or `options.buffer_size` is zero.
    pub fn add_directory_with(&self, directory: impl AsRef<str>, options: WatchOptions) -> Result<()> {
        let directory = directory.as_ref();
        assert!(!directory.is_empty(), "directory path must not be empty");
        assert!(options.buffer_size > 0, "change buffer size must be positive");

        let path = WatchPath::new(directory);
        let handle = self
            .source
            .open(&path)
            .map_err(|source| WatchError::OpenDirectory {
                path: directory.to_string(),
                source,
            })?;

        let request = WatchRequest::new(path, handle, options.buffer_size, options.recursive);
        info!(
            "Adding {} (recursive: {}, buffer: {} bytes)",
            directory, options.recursive, options.buffer_size
        );
        self.send(Job::Watch(request))
    }

    /// Pop the next change, if any, without blocking
    ///
    /// A rename's first half is held back until its second half has arrived.
    pub fn try_get_next_change(&self) -> Option<FileChange> {
        self.queue.pop()
    }

    /// Drain every change available right now
    pub fn changes(&self) -> impl Iterator<Item = FileChange> + '_ {
        std::iter::from_fn(move || self.queue.pop())
    }

    /// Changes queued but not yet taken
    pub fn pending_changes(&self) -> usize {
        self.queue.len()
    }

    /// Watches with a read in flight or a cancellation not yet acknowledged
    pub fn active_watches(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Cancel every watch and block until the worker thread has exited
    ///
    /// No change is queued after this returns.
    pub fn shut_down(mut self) {
        self.stop();
    }

    fn send(&self, job: Job<S::Directory>) -> Result<()> {
        let jobs = self.jobs.as_ref().ok_or(WatchError::WorkerDisconnected)?;
        // A job that can't be delivered is dropped here, closing its directory
        jobs.send(job).map_err(|_| WatchError::WorkerDisconnected)?;
        self.source.wake();
        Ok(())
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if let Some(jobs) = self.jobs.take() {
            let _ = jobs.send(Job::Shutdown);
        }
        self.source.wake();

        if worker.join().is_err() {
            error!("Watcher thread panicked");
        }
        info!("Directory watcher stopped");
    }
}

impl<S: ChangeSource> Drop for Watcher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S: ChangeSource> fmt::Debug for Watcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("active_watches", &self.active_watches())
            .field("pending_changes", &self.pending_changes())
            .field("running", &self.worker.is_some())
            .finish()
    }
}

#[cfg(windows)]
mod native {
    use super::Watcher;
    use crate::config::WatcherConfig;
    use crate::error::{Result, WatchError};
    use crate::source::windows::ReadDirectoryChanges;

    /// Watcher backed by `ReadDirectoryChangesExW`
    pub type DirectoryWatcher = Watcher<ReadDirectoryChanges>;

    impl Watcher<ReadDirectoryChanges> {
        /// Start a watcher with default settings
        pub fn new() -> Result<Self> {
            Self::with_config(WatcherConfig::default())
        }

        pub fn with_config(config: WatcherConfig) -> Result<Self> {
            let source = ReadDirectoryChanges::new().map_err(WatchError::CreateSource)?;
            Self::with_source(source, config)
        }
    }
}

#[cfg(windows)]
pub use native::DirectoryWatcher;
