//! In-memory change source for tests
//!
//! Opens real directories (so open failures behave like the OS), records
//! every read the worker arms, and lets a test play the OS: fill an armed
//! buffer, report an overflow, or fail a read.

use super::{ChangeSource, Completion, CompletionStatus};
use crate::path::WatchPath;
use crate::request::RequestId;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
pub(crate) struct ScriptedSource {
    state: Arc<State>,
}

#[derive(Default)]
struct State {
    inner: Mutex<Inner>,
    changed: Condvar,
}

#[derive(Default)]
struct Inner {
    open_directories: usize,
    /// Reads handed to the "OS", by request
    armed: HashMap<RequestId, ArmedRead>,
    /// Buffer address of every read armed, per directory path
    history: HashMap<String, Vec<usize>>,
    inbox: Vec<Completion>,
    woken: bool,
    fail_next_arm: HashSet<String>,
}

struct ArmedRead {
    path: String,
    buffer: usize,
    len: usize,
}

pub(crate) struct ScriptedDirectory {
    path: String,
    open: bool,
    state: Arc<State>,
}

impl Drop for ScriptedDirectory {
    fn drop(&mut self) {
        if self.open {
            self.state.inner.lock().open_directories -= 1;
        }
    }
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open_directories(&self) -> usize {
        self.state.inner.lock().open_directories
    }

    pub(crate) fn is_armed(&self, path: &str) -> bool {
        self.state.inner.lock().armed.values().any(|read| read.path == path)
    }

    /// Buffer addresses of every read armed for `path`, oldest first
    pub(crate) fn arm_history(&self, path: &str) -> Vec<usize> {
        self.state.inner.lock().history.get(path).cloned().unwrap_or_default()
    }

    /// Make the next read armed for `path` fail synchronously
    pub(crate) fn fail_next_arm(&self, path: &str) {
        self.state.inner.lock().fail_next_arm.insert(path.to_string());
    }

    /// Block until a read is armed for `path`; false on timeout
    pub(crate) fn wait_until_armed(&self, path: &str) -> bool {
        let mut inner = self.state.inner.lock();
        while !inner.armed.values().any(|read| read.path == path) {
            if self.state.changed.wait_for(&mut inner, TIMEOUT).timed_out() {
                return false;
            }
        }
        true
    }

    /// Fill the read armed for `path` with `payload` and complete it
    pub(crate) fn complete(&self, path: &str, payload: &[u8]) {
        self.finish(path, |read| {
            assert!(payload.len() <= read.len, "payload larger than armed buffer");
            // SAFETY: the worker keeps an armed buffer alive and untouched
            // until its completion is delivered, which happens below.
            unsafe {
                std::ptr::copy_nonoverlapping(payload.as_ptr(), read.buffer as *mut u8, payload.len());
            }
            CompletionStatus::Transferred(payload.len() as u32)
        });
    }

    /// Complete the read armed for `path` as an overflow
    pub(crate) fn overflow(&self, path: &str) {
        self.finish(path, |_| CompletionStatus::Transferred(0));
    }

    /// Fail the read armed for `path`
    pub(crate) fn fail(&self, path: &str, error: io::Error) {
        self.finish(path, move |_| CompletionStatus::Failed(error));
    }

    fn finish(&self, path: &str, status: impl FnOnce(&ArmedRead) -> CompletionStatus) {
        assert!(self.wait_until_armed(path), "no read armed for {path}");
        let mut inner = self.state.inner.lock();
        let id = inner
            .armed
            .iter()
            .find(|(_, read)| read.path == path)
            .map(|(id, _)| *id)
            .unwrap();
        let read = inner.armed.remove(&id).unwrap();
        let status = status(&read);
        inner.inbox.push(Completion::new(id, status));
        self.state.changed.notify_all();
    }
}

impl ChangeSource for ScriptedSource {
    type Directory = ScriptedDirectory;

    fn open(&self, path: &WatchPath) -> io::Result<ScriptedDirectory> {
        if !Path::new(path.as_str()).is_dir() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "not a directory"));
        }
        self.state.inner.lock().open_directories += 1;
        Ok(ScriptedDirectory {
            path: path.as_str().to_string(),
            open: true,
            state: Arc::clone(&self.state),
        })
    }

    unsafe fn read(
        &self,
        directory: &mut ScriptedDirectory,
        id: RequestId,
        buffer: &mut [u8],
        _recursive: bool,
    ) -> io::Result<()> {
        let mut inner = self.state.inner.lock();
        assert!(directory.open, "read armed on a closed directory");
        if inner.fail_next_arm.remove(&directory.path) {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted arm failure"));
        }
        assert!(
            !inner.armed.contains_key(&id),
            "second read armed while one is pending"
        );

        let address = buffer.as_mut_ptr() as usize;
        inner
            .history
            .entry(directory.path.clone())
            .or_default()
            .push(address);
        inner.armed.insert(
            id,
            ArmedRead {
                path: directory.path.clone(),
                buffer: address,
                len: buffer.len(),
            },
        );
        self.state.changed.notify_all();
        Ok(())
    }

    fn cancel(&self, directory: &mut ScriptedDirectory) {
        let mut inner = self.state.inner.lock();
        let pending: Vec<RequestId> = inner
            .armed
            .iter()
            .filter(|(_, read)| read.path == directory.path)
            .map(|(id, _)| *id)
            .collect();
        for id in pending {
            inner.armed.remove(&id);
            inner.inbox.push(Completion::new(id, CompletionStatus::Aborted));
        }
        if directory.open {
            directory.open = false;
            inner.open_directories -= 1;
        }
        self.state.changed.notify_all();
    }

    fn wait(&self, completions: &mut Vec<Completion>) {
        let mut inner = self.state.inner.lock();
        while inner.inbox.is_empty() && !inner.woken {
            self.state.changed.wait(&mut inner);
        }
        inner.woken = false;
        completions.append(&mut inner.inbox);
    }

    fn wake(&self) {
        self.state.inner.lock().woken = true;
        self.state.changed.notify_all();
    }
}
