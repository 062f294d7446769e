//! Native change-notification sources
//!
//! A [`ChangeSource`] is the asynchronous OS primitive the worker drives:
//! open a directory, issue a read into a caller-owned buffer, cancel, and
//! wait for completions. Exactly one native source exists per build.

use crate::path::WatchPath;
use crate::request::RequestId;
use std::io;

#[cfg(windows)]
pub mod windows;

#[cfg(test)]
pub(crate) mod scripted;

/// Outcome of one asynchronous read
#[derive(Debug)]
pub enum CompletionStatus {
    /// The read finished. Zero bytes with no error means the buffer overflowed.
    Transferred(u32),
    /// The read was cancelled, normally because the directory was closed
    Aborted,
    /// The read failed for any other reason
    Failed(io::Error),
}

/// A finished read, tagged with the request it was issued for
#[derive(Debug)]
pub struct Completion {
    pub id: RequestId,
    pub status: CompletionStatus,
}

impl Completion {
    pub fn new(id: RequestId, status: CompletionStatus) -> Self {
        Self { id, status }
    }
}

/// The asynchronous directory-notification primitive
///
/// `open` runs on the thread calling `add_directory`; everything else runs on
/// the worker thread, which also issued every read it waits on.
pub trait ChangeSource: Send + Sync + 'static {
    /// An open directory handle plus whatever per-read state the OS needs
    type Directory: Send + 'static;

    /// Open `path` for change notification
    fn open(&self, path: &WatchPath) -> io::Result<Self::Directory>;

    /// Start an asynchronous read of changes into `buffer`
    ///
    /// The outcome is reported later through [`ChangeSource::wait`] as a
    /// [`Completion`] carrying `id`. At most one read per directory is in
    /// flight.
    ///
    /// # Safety
    ///
    /// The OS writes into `buffer` after this call returns. The caller must
    /// keep the buffer alive and must not touch it until the completion for
    /// `id` has been returned by `wait`. `directory` must not be dropped
    /// before then either.
    unsafe fn read(
        &self,
        directory: &mut Self::Directory,
        id: RequestId,
        buffer: &mut [u8],
        recursive: bool,
    ) -> io::Result<()>;

    /// Cancel any pending read on `directory` and close it
    ///
    /// A pending read still produces exactly one completion, normally
    /// [`CompletionStatus::Aborted`].
    fn cancel(&self, directory: &mut Self::Directory);

    /// Block until at least one completion is available or [`ChangeSource::wake`]
    /// is called, appending any completions to `completions`
    fn wait(&self, completions: &mut Vec<Completion>);

    /// Interrupt a current or the next [`ChangeSource::wait`]; callable from any thread
    fn wake(&self);
}
