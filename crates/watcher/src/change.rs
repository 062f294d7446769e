//! Change records handed to the consumer
//!
//! A [`FileChange`] is a plain value: it is built once by the decoder on the
//! worker thread, queued, and popped exactly once by the consumer.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Longest relative path the notification API reports, in UTF-16 units
pub const MAX_RELATIVE_PATH_UNITS: usize = 260;

/// Upper bound on [`FileChange::path`] in UTF-8 bytes
///
/// One UTF-16 unit encodes to at most 3 UTF-8 bytes. The native ceiling
/// (`MAX_PATH * 3`) reserves one byte for a terminator we don't store.
pub const MAX_CHANGE_PATH_BYTES: usize = MAX_RELATIVE_PATH_UNITS * 3 - 1;

/// `FILE_ATTRIBUTE_DIRECTORY`
pub const ATTRIBUTE_DIRECTORY: u32 = 0x10;

/// FILETIME ticks (100ns) between 1601-01-01 and the Unix epoch
const FILETIME_UNIX_OFFSET: u64 = 116_444_736_000_000_000;

/// What happened to a file or directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FileAction {
    /// Native action code was not recognized
    #[default]
    None,
    /// File or directory created
    Added,
    /// File or directory deleted
    Removed,
    /// Contents or timestamps changed
    Modified,
    /// Old name of a renamed entry; always followed by [`FileAction::RenamedTo`]
    RenamedFrom,
    /// New name of a renamed entry
    RenamedTo,
    /// The change buffer overflowed and individual changes were lost.
    /// Treat the directory as an unknown delta and rescan it.
    TooManyChanges,
    /// The watch failed and was dropped; the directory is no longer monitored
    WatchStopped,
}

/// Action code as reported in `FILE_NOTIFY_EXTENDED_INFORMATION::Action`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeAction {
    Added,
    Removed,
    Modified,
    RenamedOldName,
    RenamedNewName,
    Unknown(u32),
}

impl From<u32> for NativeAction {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::Added,
            2 => Self::Removed,
            3 => Self::Modified,
            4 => Self::RenamedOldName,
            5 => Self::RenamedNewName,
            other => Self::Unknown(other),
        }
    }
}

impl From<NativeAction> for FileAction {
    fn from(action: NativeAction) -> Self {
        match action {
            NativeAction::Added => Self::Added,
            NativeAction::Removed => Self::Removed,
            NativeAction::Modified => Self::Modified,
            NativeAction::RenamedOldName => Self::RenamedFrom,
            NativeAction::RenamedNewName => Self::RenamedTo,
            NativeAction::Unknown(_) => Self::None,
        }
    }
}

/// A single change observed in a watched directory
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileChange {
    /// Watched directory joined with the reported relative path,
    /// at most [`MAX_CHANGE_PATH_BYTES`] long
    pub path: String,
    pub action: FileAction,

    /// Raw FILETIME ticks, see [`filetime_to_system_time`]
    pub creation_time: u64,
    pub modification_time: u64,
    pub change_time: u64,
    pub access_time: u64,

    pub size: u64,
    /// `FILE_ATTRIBUTE_*` bitmask
    pub attributes: u32,
    pub is_directory: bool,
}

impl FileChange {
    /// Record for a whole directory, as used for overflow and failed watches
    pub(crate) fn directory_event(action: FileAction, path: String) -> Self {
        Self {
            path,
            action,
            is_directory: true,
            ..Default::default()
        }
    }

    /// Length of [`FileChange::path`] in bytes
    pub fn path_length(&self) -> usize {
        self.path.len()
    }

    pub fn created_at(&self) -> Option<SystemTime> {
        filetime_to_system_time(self.creation_time)
    }

    pub fn modified_at(&self) -> Option<SystemTime> {
        filetime_to_system_time(self.modification_time)
    }

    pub fn changed_at(&self) -> Option<SystemTime> {
        filetime_to_system_time(self.change_time)
    }

    pub fn accessed_at(&self) -> Option<SystemTime> {
        filetime_to_system_time(self.access_time)
    }
}

/// Convert FILETIME ticks (100ns since 1601) to a [`SystemTime`]
///
/// Returns `None` for zero (not reported) and for instants before the Unix epoch.
pub fn filetime_to_system_time(ticks: u64) -> Option<SystemTime> {
    if ticks == 0 {
        return None;
    }
    let since_unix = ticks.checked_sub(FILETIME_UNIX_OFFSET)?;
    let secs = since_unix / 10_000_000;
    let nanos = (since_unix % 10_000_000) * 100;
    UNIX_EPOCH.checked_add(Duration::new(secs, nanos as u32))
}

/// Truncate `path` to [`MAX_CHANGE_PATH_BYTES`] without splitting a character
///
/// A truncated path no longer names the file that changed, so it is logged.
pub(crate) fn bound_path(mut path: String) -> String {
    if path.len() > MAX_CHANGE_PATH_BYTES {
        let full_len = path.len();
        let mut end = MAX_CHANGE_PATH_BYTES;
        while !path.is_char_boundary(end) {
            end -= 1;
        }
        path.truncate(end);
        warn!(
            "Change path of {} bytes truncated to {}: {}",
            full_len,
            path.len(),
            path
        );
    }
    path
}
