//! Decoder for raw change-notification buffers
//!
//! The OS fills a buffer with a chain of variable-length
//! `FILE_NOTIFY_EXTENDED_INFORMATION` entries. Each entry stores the byte
//! offset of the next one, with 0 marking the last. Fields are read with
//! explicit little-endian loads and bounds checks, so a short or corrupt buffer
//! ends decoding early instead of reading past the end.

use crate::change::{bound_path, FileAction, FileChange, NativeAction, ATTRIBUTE_DIRECTORY};
use crate::path::WatchPath;
use crate::queue::EventQueue;
use tracing::warn;

const NEXT_ENTRY_OFFSET: usize = 0;
const ACTION: usize = 4;
const CREATION_TIME: usize = 8;
const LAST_MODIFICATION_TIME: usize = 16;
const LAST_CHANGE_TIME: usize = 24;
const LAST_ACCESS_TIME: usize = 32;
const FILE_SIZE: usize = 48;
const FILE_ATTRIBUTES: usize = 56;
const FILE_NAME_LENGTH: usize = 80;
const FILE_NAME: usize = 84;

/// Size of an entry header including the padded one-unit name array
pub const ENTRY_HEADER_SIZE: usize = 88;

/// Decode one completed read for `directory` and push the results
///
/// `None` means the read overflowed. That produces a single
/// [`FileAction::TooManyChanges`] record naming the directory itself.
///
/// Returns the number of records pushed.
pub fn decode_notifications(
    buffer: Option<&[u8]>,
    directory: &WatchPath,
    queue: &EventQueue,
) -> usize {
    let Some(buffer) = buffer else {
        queue.push(FileChange::directory_event(
            FileAction::TooManyChanges,
            bound_path(directory.as_str().to_string()),
        ));
        return 1;
    };

    let mut pushed = 0;
    let mut offset = 0;
    loop {
        let Some(entry) = Entry::parse(buffer, offset) else {
            warn!(
                "Truncated notification entry at offset {} for {} ({} bytes)",
                offset,
                directory,
                buffer.len()
            );
            break;
        };

        queue.push(entry.to_change(directory));
        pushed += 1;

        if entry.next_entry_offset == 0 {
            break;
        }
        offset += entry.next_entry_offset as usize;
    }
    pushed
}

/// Borrowed view of a single notification entry
struct Entry<'a> {
    next_entry_offset: u32,
    action: NativeAction,
    creation_time: u64,
    modification_time: u64,
    change_time: u64,
    access_time: u64,
    size: u64,
    attributes: u32,
    file_name: &'a [u8],
}

impl<'a> Entry<'a> {
    fn parse(buffer: &'a [u8], offset: usize) -> Option<Self> {
        let entry = buffer.get(offset..)?;
        let name_len = read_u32(entry, FILE_NAME_LENGTH)? as usize;
        let file_name = entry.get(FILE_NAME..FILE_NAME.checked_add(name_len)?)?;

        Some(Self {
            next_entry_offset: read_u32(entry, NEXT_ENTRY_OFFSET)?,
            action: NativeAction::from(read_u32(entry, ACTION)?),
            creation_time: read_u64(entry, CREATION_TIME)?,
            modification_time: read_u64(entry, LAST_MODIFICATION_TIME)?,
            change_time: read_u64(entry, LAST_CHANGE_TIME)?,
            access_time: read_u64(entry, LAST_ACCESS_TIME)?,
            size: read_u64(entry, FILE_SIZE)?,
            attributes: read_u32(entry, FILE_ATTRIBUTES)?,
            file_name,
        })
    }

    fn to_change(&self, directory: &WatchPath) -> FileChange {
        let name: Vec<u16> = self
            .file_name
            .chunks_exact(2)
            .map(|unit| u16::from_le_bytes([unit[0], unit[1]]))
            .collect();
        let combined = directory.join_wide(&name);

        FileChange {
            path: bound_path(String::from_utf16_lossy(&combined)),
            action: FileAction::from(self.action),
            creation_time: self.creation_time,
            modification_time: self.modification_time,
            change_time: self.change_time,
            access_time: self.access_time,
            size: self.size,
            attributes: self.attributes,
            is_directory: self.attributes & ATTRIBUTE_DIRECTORY != 0,
        }
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let raw = bytes.get(at..at + 8)?;
    Some(u64::from_le_bytes(raw.try_into().ok()?))
}

/// Builds buffers in the native notification layout
///
/// Handy for exercising consumers and the decoder without an OS behind them.
#[derive(Debug, Default)]
pub struct NotificationBuilder {
    bytes: Vec<u8>,
    last_entry: Option<usize>,
}

/// Fields of one entry for [`NotificationBuilder::push`]
#[derive(Debug, Clone, Default)]
pub struct RawEntry {
    pub action: u32,
    pub file_name: String,
    pub creation_time: u64,
    pub modification_time: u64,
    pub change_time: u64,
    pub access_time: u64,
    pub size: u64,
    pub attributes: u32,
}

impl RawEntry {
    pub fn new(action: u32, file_name: impl Into<String>) -> Self {
        Self {
            action,
            file_name: file_name.into(),
            ..Default::default()
        }
    }
}

impl NotificationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, linking the previous entry to it
    pub fn push(mut self, entry: RawEntry) -> Self {
        let start = self.bytes.len();
        if let Some(previous) = self.last_entry {
            let link = (start - previous) as u32;
            self.bytes[previous..previous + 4].copy_from_slice(&link.to_le_bytes());
        }

        let name: Vec<u8> = entry
            .file_name
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        // Entries are 8-byte aligned like the OS lays them out
        let len = (FILE_NAME + name.len()).max(ENTRY_HEADER_SIZE).next_multiple_of(8);
        self.bytes.resize(start + len, 0);

        let record = &mut self.bytes[start..];
        record[ACTION..ACTION + 4].copy_from_slice(&entry.action.to_le_bytes());
        record[CREATION_TIME..CREATION_TIME + 8].copy_from_slice(&entry.creation_time.to_le_bytes());
        record[LAST_MODIFICATION_TIME..LAST_MODIFICATION_TIME + 8]
            .copy_from_slice(&entry.modification_time.to_le_bytes());
        record[LAST_CHANGE_TIME..LAST_CHANGE_TIME + 8].copy_from_slice(&entry.change_time.to_le_bytes());
        record[LAST_ACCESS_TIME..LAST_ACCESS_TIME + 8].copy_from_slice(&entry.access_time.to_le_bytes());
        record[FILE_SIZE..FILE_SIZE + 8].copy_from_slice(&entry.size.to_le_bytes());
        record[FILE_ATTRIBUTES..FILE_ATTRIBUTES + 4].copy_from_slice(&entry.attributes.to_le_bytes());
        record[FILE_NAME_LENGTH..FILE_NAME_LENGTH + 4]
            .copy_from_slice(&(name.len() as u32).to_le_bytes());
        record[FILE_NAME..FILE_NAME + name.len()].copy_from_slice(&name);

        self.last_entry = Some(start);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}
