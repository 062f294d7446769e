//! The worker thread: arms reads, handles completions, decodes
//!
//! Everything that touches watch requests runs here, one event at a time, so
//! the request collection and buffer toggles need no locking. The event queue
//! is the only state shared with the consumer.

use crate::change::{bound_path, FileAction, FileChange};
use crate::decode::decode_notifications;
use crate::queue::EventQueue;
use crate::request::{RequestId, WatchRequest};
use crate::source::{ChangeSource, Completion, CompletionStatus};
use crossbeam_channel::{Receiver, TryRecvError};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Messages from the facade to the worker
pub(crate) enum Job<D> {
    /// Take ownership of an opened directory and start reading it
    Watch(WatchRequest<D>),
    /// Cancel everything and exit once all reads have retired
    Shutdown,
}

pub(crate) struct Worker<S: ChangeSource> {
    source: Arc<S>,
    jobs: Receiver<Job<S::Directory>>,
    queue: Arc<EventQueue>,
    /// Requests with a read in flight or a cancellation not yet acknowledged
    requests: HashMap<RequestId, WatchRequest<S::Directory>>,
    /// Mirror of `requests.len()` for the facade
    active: Arc<AtomicUsize>,
    terminating: bool,
}

impl<S: ChangeSource> Worker<S> {
    pub(crate) fn new(
        source: Arc<S>,
        jobs: Receiver<Job<S::Directory>>,
        queue: Arc<EventQueue>,
        active: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            source,
            jobs,
            queue,
            requests: HashMap::new(),
            active,
            terminating: false,
        }
    }

    /// Run until shutdown has been requested and every request has retired
    pub(crate) fn run(mut self) {
        debug!("Watcher thread started");
        let mut completions = Vec::new();

        loop {
            self.drain_jobs();
            if self.is_finished() {
                break;
            }

            self.source.wait(&mut completions);
            for completion in completions.drain(..) {
                self.handle_completion(completion);
            }
        }

        debug!("Watcher thread exiting");
    }

    fn is_finished(&self) -> bool {
        self.terminating && self.requests.is_empty()
    }

    fn drain_jobs(&mut self) {
        loop {
            match self.jobs.try_recv() {
                Ok(job) => self.handle_job(job),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.terminating {
                        warn!("Watcher handle dropped without shutdown, stopping");
                        self.begin_shutdown();
                    }
                    break;
                }
            }
        }
    }

    pub(crate) fn handle_job(&mut self, job: Job<S::Directory>) {
        match job {
            Job::Watch(mut request) => {
                if self.terminating {
                    // Never armed, so closing it is all the cleanup needed
                    self.source.cancel(&mut request.directory);
                    return;
                }

                let id = request.id;
                info!("Watching {} (request {})", request.path, id);
                self.requests.insert(id, request);
                self.update_active();

                if let Err(err) = self.arm(id) {
                    error!("Failed to start reading request {}: {}", id, err);
                    self.stop_watch(id);
                }
            }
            Job::Shutdown => self.begin_shutdown(),
        }
    }

    pub(crate) fn handle_completion(&mut self, completion: Completion) {
        let Completion { id, status } = completion;
        if !self.requests.contains_key(&id) {
            warn!("Completion for unknown request {}", id);
            return;
        }

        let bytes = match status {
            CompletionStatus::Aborted => {
                self.retire(id);
                return;
            }
            _ if self.terminating => {
                self.retire(id);
                return;
            }
            CompletionStatus::Failed(err) => {
                error!("Read failed for request {}: {}", id, err);
                self.stop_watch(id);
                return;
            }
            CompletionStatus::Transferred(bytes) => bytes as usize,
        };

        // Get the next read going before decoding, so changes made while we
        // decode land in the other buffer instead of being missed.
        let rearmed = self.arm(id);

        if let Some(request) = self.requests.get(&id) {
            let buffer = request.buffers.idle();
            let filled = if bytes == 0 {
                warn!("Change buffer overflowed for {}", request.path);
                None
            } else {
                Some(&buffer[..bytes.min(buffer.len())])
            };
            let pushed = decode_notifications(filled, &request.path, &self.queue);
            debug!("Request {} produced {} change(s)", id, pushed);
        }

        if let Err(err) = rearmed {
            error!("Failed to re-arm request {}: {}", id, err);
            self.stop_watch(id);
        }
    }

    fn arm(&mut self, id: RequestId) -> io::Result<()> {
        let Some(request) = self.requests.get_mut(&id) else {
            return Ok(());
        };
        let buffer = request.buffers.arm_next();
        // SAFETY: the request, and with it both buffers and the directory,
        // stays in `self.requests` until this read's completion is handled.
        // Only the other buffer is read in the meantime.
        unsafe {
            self.source
                .read(&mut request.directory, id, buffer, request.recursive)
        }
    }

    fn begin_shutdown(&mut self) {
        self.terminating = true;
        info!("Shutting down {} watch(es)", self.requests.len());
        for request in self.requests.values_mut() {
            self.source.cancel(&mut request.directory);
        }
    }

    /// Free a request whose last read has completed
    fn retire(&mut self, id: RequestId) -> Option<WatchRequest<S::Directory>> {
        let request = self.requests.remove(&id);
        if let Some(request) = &request {
            debug!("Retired request {} for {}", id, request.path);
        }
        self.update_active();
        request
    }

    /// Drop a watch that can no longer read and tell the consumer
    fn stop_watch(&mut self, id: RequestId) {
        if let Some(request) = self.retire(id) {
            warn!("Stopped watching {}", request.path);
            self.queue.push(FileChange::directory_event(
                FileAction::WatchStopped,
                bound_path(request.path.as_str().to_string()),
            ));
        }
    }

    fn update_active(&self) {
        self.active.store(self.requests.len(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{NotificationBuilder, RawEntry};
    use crate::path::WatchPath;
    use crate::source::scripted::ScriptedSource;
    use crossbeam_channel::unbounded;
    use crossbeam_channel::Sender;
    use tempfile::TempDir;

    struct Harness {
        source: ScriptedSource,
        queue: Arc<EventQueue>,
        active: Arc<AtomicUsize>,
        worker: Worker<ScriptedSource>,
        _jobs: Sender<Job<<ScriptedSource as ChangeSource>::Directory>>,
    }

    impl Harness {
        fn new() -> Self {
            let source = ScriptedSource::new();
            let queue = Arc::new(EventQueue::new());
            let active = Arc::new(AtomicUsize::new(0));
            let (jobs_tx, jobs_rx) = unbounded();
            let worker = Worker::new(
                Arc::new(source.clone()),
                jobs_rx,
                Arc::clone(&queue),
                Arc::clone(&active),
            );
            Self {
                source,
                queue,
                active,
                worker,
                _jobs: jobs_tx,
            }
        }

        fn watch(&mut self, dir: &TempDir) -> String {
            let path = dir.path().to_str().unwrap().to_string();
            let watch_path = WatchPath::new(&path);
            let directory = self.source.open(&watch_path).unwrap();
            let request = WatchRequest::new(watch_path, directory, 4096, true);
            self.worker.handle_job(Job::Watch(request));
            path
        }

        /// Hand everything the scripted OS completed to the worker
        fn pump(&mut self) {
            let mut completions = Vec::new();
            self.source.wake();
            self.source.wait(&mut completions);
            for completion in completions {
                self.worker.handle_completion(completion);
            }
        }

        fn drain(&self) -> Vec<FileChange> {
            std::iter::from_fn(|| self.queue.pop()).collect()
        }
    }

    fn one_entry(action: u32, name: &str) -> Vec<u8> {
        NotificationBuilder::new().push(RawEntry::new(action, name)).build()
    }

    #[test]
    fn test_watch_job_arms_first_read() {
        let dir = TempDir::new().unwrap();
        let mut harness = Harness::new();
        let path = harness.watch(&dir);

        assert!(harness.source.is_armed(&path));
        assert_eq!(harness.active.load(Ordering::Acquire), 1);
        assert!(harness.queue.is_empty());
    }

    #[test]
    fn test_completion_rearms_other_buffer_then_decodes() {
        let dir = TempDir::new().unwrap();
        let mut harness = Harness::new();
        let path = harness.watch(&dir);

        harness.source.complete(&path, &one_entry(1, "a.txt"));
        harness.pump();

        // A new read is pending before the consumer can see anything
        assert!(harness.source.is_armed(&path));
        let changes = harness.drain();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, FileAction::Added);
        assert_eq!(changes[0].path, format!("{path}\\a.txt"));

        harness.source.complete(&path, &one_entry(3, "b.txt"));
        harness.pump();
        assert_eq!(harness.drain()[0].path, format!("{path}\\b.txt"));

        let history = harness.source.arm_history(&path);
        assert_eq!(history.len(), 3);
        assert_ne!(history[0], history[1]);
        assert_eq!(history[0], history[2]);
    }

    #[test]
    fn test_overflow_reports_too_many_changes_and_keeps_watching() {
        let dir = TempDir::new().unwrap();
        let mut harness = Harness::new();
        let path = harness.watch(&dir);

        harness.source.overflow(&path);
        harness.pump();

        let changes = harness.drain();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, FileAction::TooManyChanges);
        assert!(changes[0].is_directory);
        assert_eq!(changes[0].path, path);

        assert!(harness.source.is_armed(&path));
        assert_eq!(harness.active.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_failed_read_stops_watch_and_reports_it() {
        let dir = TempDir::new().unwrap();
        let mut harness = Harness::new();
        let path = harness.watch(&dir);

        harness
            .source
            .fail(&path, io::Error::new(io::ErrorKind::PermissionDenied, "gone"));
        harness.pump();

        let changes = harness.drain();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, FileAction::WatchStopped);
        assert_eq!(changes[0].path, path);
        assert!(!harness.source.is_armed(&path));
        assert_eq!(harness.active.load(Ordering::Acquire), 0);
        assert_eq!(harness.source.open_directories(), 0);
    }

    #[test]
    fn test_rearm_failure_still_delivers_completed_changes() {
        let dir = TempDir::new().unwrap();
        let mut harness = Harness::new();
        let path = harness.watch(&dir);

        harness.source.complete(&path, &one_entry(2, "old.log"));
        harness.source.fail_next_arm(&path);
        harness.pump();

        let actions: Vec<_> = harness.drain().into_iter().map(|c| c.action).collect();
        assert_eq!(actions, vec![FileAction::Removed, FileAction::WatchStopped]);
        assert_eq!(harness.source.open_directories(), 0);
    }

    #[test]
    fn test_first_arm_failure_releases_request() {
        let dir = TempDir::new().unwrap();
        let mut harness = Harness::new();
        let path = dir.path().to_str().unwrap().to_string();
        harness.source.fail_next_arm(&path);
        harness.watch(&dir);

        assert_eq!(harness.active.load(Ordering::Acquire), 0);
        assert_eq!(harness.source.open_directories(), 0);
        assert_eq!(harness.drain()[0].action, FileAction::WatchStopped);
    }

    #[test]
    fn test_shutdown_retires_on_abort_without_events() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let mut harness = Harness::new();
        harness.watch(&first);
        harness.watch(&second);
        assert_eq!(harness.active.load(Ordering::Acquire), 2);

        harness.worker.handle_job(Job::Shutdown);
        // Directories are closed immediately, requests live until their abort arrives
        assert_eq!(harness.source.open_directories(), 0);
        assert_eq!(harness.active.load(Ordering::Acquire), 2);
        assert!(!harness.worker.is_finished());

        harness.pump();
        assert!(harness.worker.is_finished());
        assert_eq!(harness.active.load(Ordering::Acquire), 0);
        assert!(harness.queue.is_empty());
    }

    #[test]
    fn test_completion_racing_shutdown_is_not_decoded() {
        let dir = TempDir::new().unwrap();
        let mut harness = Harness::new();
        let path = harness.watch(&dir);

        // The read finished just before cancellation reached it
        harness.source.complete(&path, &one_entry(1, "late.txt"));
        harness.worker.handle_job(Job::Shutdown);
        harness.pump();

        assert!(harness.worker.is_finished());
        assert!(harness.queue.is_empty());
        assert!(!harness.source.is_armed(&path));
    }

    #[test]
    fn test_watch_after_shutdown_is_closed_not_armed() {
        let dir = TempDir::new().unwrap();
        let mut harness = Harness::new();
        harness.worker.handle_job(Job::Shutdown);

        let path = harness.watch(&dir);
        assert!(!harness.source.is_armed(&path));
        assert_eq!(harness.source.open_directories(), 0);
        assert!(harness.worker.is_finished());
    }

    #[test]
    fn test_run_exits_when_jobs_disconnect() {
        let source = ScriptedSource::new();
        let (jobs_tx, jobs_rx) = unbounded::<Job<<ScriptedSource as ChangeSource>::Directory>>();
        let worker = Worker::new(
            Arc::new(source.clone()),
            jobs_rx,
            Arc::new(EventQueue::new()),
            Arc::new(AtomicUsize::new(0)),
        );
        let handle = std::thread::spawn(move || worker.run());

        drop(jobs_tx);
        source.wake();
        handle.join().unwrap();
    }
}
