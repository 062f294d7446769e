//! Directory change watching for Windows
//!
//! This crate watches directories with `ReadDirectoryChangesExW` and hands
//! the changes to a polling consumer:
//! - One worker thread drives every watch through alertable waits
//! - Each watch double-buffers its reads so no change is lost while decoding
//! - Changes land in a growable queue that never splits a rename pair
//! - Overflow and failed watches are reported as records, not errors
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn main() -> dirwatch::Result<()> {
//! use dirwatch::{DirectoryWatcher, FileAction};
//!
//! let watcher = DirectoryWatcher::new()?;
//! watcher.add_directory(r"C:\projects\assets")?;
//!
//! loop {
//!     while let Some(change) = watcher.try_get_next_change() {
//!         match change.action {
//!             FileAction::TooManyChanges => println!("rescan {}", change.path),
//!             action => println!("{action:?} {}", change.path),
//!         }
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! # }
//! # #[cfg(not(windows))]
//! # fn main() {}
//! ```

pub mod change;
pub mod config;
pub mod decode;
pub mod error;
pub mod path;
pub mod queue;
pub mod request;
pub mod rescan;
pub mod source;
pub mod watcher;
mod worker;

pub use change::{filetime_to_system_time, FileAction, FileChange, MAX_CHANGE_PATH_BYTES};
pub use config::{WatchOptions, WatcherConfig};
pub use error::{Result, WatchError};
pub use path::WatchPath;
pub use queue::EventQueue;
pub use request::RequestId;
pub use rescan::rescan_since;
pub use source::{ChangeSource, Completion, CompletionStatus};
pub use watcher::Watcher;

#[cfg(windows)]
pub use source::windows::ReadDirectoryChanges;
#[cfg(windows)]
pub use watcher::DirectoryWatcher;
