//! Recovery scan after an overflow
//!
//! A `TooManyChanges` record means the OS dropped notifications for a
//! directory. Walking the tree and comparing modification times against the
//! last moment the consumer was known to be up to date recovers the files
//! that changed in the gap.

use crate::error::Result;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Files under `directory` modified at or after `since`
///
/// Paths are returned relative to `directory`. Only direct children are
/// visited unless `recursive` is set. Entries that vanish mid-walk are
/// skipped.
pub fn rescan_since(directory: &Path, since: SystemTime, recursive: bool) -> Result<Vec<PathBuf>> {
    // Only entries below the root may vanish quietly
    std::fs::metadata(directory)?;

    let mut walker = WalkDir::new(directory).follow_links(false).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut changed = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if is_not_found(&err) => {
                debug!("Skipping vanished entry during rescan: {}", err);
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let modified = match entry.metadata() {
            Ok(metadata) => metadata.modified()?,
            Err(err) if is_not_found(&err) => continue,
            Err(err) => return Err(err.into()),
        };

        if modified >= since {
            if let Ok(relative) = entry.path().strip_prefix(directory) {
                changed.push(relative.to_path_buf());
            }
        }
    }

    info!("Rescan of {} found {} changed files", directory.display(), changed.len());
    Ok(changed)
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error().map(|e| e.kind()) == Some(io::ErrorKind::NotFound)
}
