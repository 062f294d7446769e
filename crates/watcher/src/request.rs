//! Per-directory watch state

use crate::path::WatchPath;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identifier of a watch request, also carried by its completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate a process-unique identifier
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Heap buffer the OS writes notifications into
///
/// Backed by `u64` words so the start is 8-byte aligned, which covers the
/// DWORD alignment the notification API requires.
struct NotifyBuffer {
    words: Box<[u64]>,
}

impl NotifyBuffer {
    fn new(size: usize) -> Self {
        Self {
            words: vec![0u64; size.div_ceil(8)].into_boxed_slice(),
        }
    }

    fn len(&self) -> usize {
        self.words.len() * 8
    }

    fn as_bytes(&self) -> &[u8] {
        // SAFETY: u64 has no padding and any byte pattern is a valid u8
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len()) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        // SAFETY: as above, and we hold the only borrow of `words`
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), len) }
    }
}

/// Two equally sized buffers: one being filled, one holding the last result
pub(crate) struct DoubleBuffer {
    buffers: [NotifyBuffer; 2],
    index: usize,
}

impl DoubleBuffer {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            buffers: [NotifyBuffer::new(size), NotifyBuffer::new(size)],
            index: 0,
        }
    }

    /// Buffer to hand to the next read; flips the toggle
    pub(crate) fn arm_next(&mut self) -> &mut [u8] {
        let index = self.index;
        self.index ^= 1;
        self.buffers[index].as_bytes_mut()
    }

    /// The buffer not currently handed to the OS
    ///
    /// Right after a completion has re-armed, this holds the data of the read
    /// that just completed.
    pub(crate) fn idle(&self) -> &[u8] {
        self.buffers[self.index].as_bytes()
    }

    /// Index the next [`DoubleBuffer::arm_next`] will use
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn size(&self) -> usize {
        self.buffers[0].len()
    }
}

/// One watched directory
///
/// Built on the caller's thread by `add_directory`, then owned by the worker
/// until the final completion for its id is observed.
pub(crate) struct WatchRequest<D> {
    pub(crate) id: RequestId,
    pub(crate) path: WatchPath,
    pub(crate) directory: D,
    pub(crate) buffers: DoubleBuffer,
    pub(crate) recursive: bool,
}

impl<D> WatchRequest<D> {
    pub(crate) fn new(path: WatchPath, directory: D, buffer_size: usize, recursive: bool) -> Self {
        Self {
            id: RequestId::next(),
            path,
            directory,
            buffers: DoubleBuffer::new(buffer_size),
            recursive,
        }
    }
}

impl<D> fmt::Debug for WatchRequest<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRequest")
            .field("id", &self.id)
            .field("path", &self.path.as_str())
            .field("buffer_size", &self.buffers.size())
            .field("buffer_index", &self.buffers.index())
            .field("recursive", &self.recursive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_alternate() {
        let mut buffers = DoubleBuffer::new(64);
        let first = buffers.arm_next().as_ptr();
        let second = buffers.arm_next().as_ptr();
        let third = buffers.arm_next().as_ptr();

        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_idle_holds_completed_read_after_rearm() {
        let mut buffers = DoubleBuffer::new(16);
        // First read lands in buffer 0
        buffers.arm_next()[0] = 7;

        // Completion re-arms against buffer 1 before decoding
        let armed = buffers.arm_next().as_ptr();
        assert_ne!(armed, buffers.idle().as_ptr());
        assert_eq!(buffers.idle()[0], 7);
    }

    #[test]
    fn test_size_rounds_up_and_aligns() {
        let mut buffers = DoubleBuffer::new(30);
        assert_eq!(buffers.size(), 32);
        assert_eq!(buffers.arm_next().as_ptr() as usize % 8, 0);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert_ne!(a, b);
        assert_eq!(RequestId::from_u64(a.as_u64()), a);
    }
}
