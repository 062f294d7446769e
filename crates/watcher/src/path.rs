//! Directory paths in the encoding the OS wants
//!
//! The path is converted to UTF-16 once when a directory is added and kept
//! alongside the original string, so decoding never has to re-encode it.

use std::fmt;

const BACKSLASH: u16 = b'\\' as u16;
const SLASH: u16 = b'/' as u16;

/// A watched directory, stored once as UTF-16 and once as UTF-8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPath {
    wide: Vec<u16>,
    display: String,
}

impl WatchPath {
    pub fn new(path: &str) -> Self {
        Self {
            wide: path.encode_utf16().collect(),
            display: path.to_string(),
        }
    }

    /// UTF-16 units followed by a NUL, for passing to the OS
    pub fn to_wide_nul(&self) -> Vec<u16> {
        let mut wide = Vec::with_capacity(self.wide.len() + 1);
        wide.extend_from_slice(&self.wide);
        wide.push(0);
        wide
    }

    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// Length in UTF-16 units
    pub fn len(&self) -> usize {
        self.wide.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wide.is_empty()
    }

    fn ends_with_separator(&self) -> bool {
        matches!(self.wide.last(), Some(&BACKSLASH) | Some(&SLASH))
    }

    /// Append a reported file name to this directory
    ///
    /// A `\` is inserted only if the directory doesn't already end in a separator.
    pub fn join_wide(&self, file_name: &[u16]) -> Vec<u16> {
        let mut combined = Vec::with_capacity(self.wide.len() + 1 + file_name.len());
        combined.extend_from_slice(&self.wide);
        if !self.ends_with_separator() {
            combined.push(BACKSLASH);
        }
        combined.extend_from_slice(file_name);
        combined
    }
}

impl fmt::Display for WatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}
