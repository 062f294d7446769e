//! Thread-safe growable ring buffer of change records
//!
//! The worker thread pushes, the consumer thread pops. Both critical sections
//! are O(1) apart from the occasional grow.

use crate::change::{FileAction, FileChange};
use parking_lot::Mutex;

/// Capacity used by [`EventQueue::new`]
pub const INITIAL_CAPACITY: usize = 16;

/// Multiplier applied to the capacity when the ring is full
const GROW_RATE: usize = 2;

/// FIFO of [`FileChange`] shared between the worker and the consumer
#[derive(Debug)]
pub struct EventQueue {
    ring: Mutex<Ring>,
}

#[derive(Debug)]
struct Ring {
    slots: Vec<Option<FileChange>>,
    front: usize,
    count: usize,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Create a queue with room for `capacity` records before the first grow
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event queue capacity must be positive");
        Self {
            ring: Mutex::new(Ring {
                slots: empty_slots(capacity),
                front: 0,
                count: 0,
            }),
        }
    }

    /// Append a record at the back, growing the ring if it is full
    pub fn push(&self, change: FileChange) {
        let mut ring = self.ring.lock();
        if ring.count == ring.slots.len() {
            ring.grow();
        }
        let back = (ring.front + ring.count) % ring.slots.len();
        ring.slots[back] = Some(change);
        ring.count += 1;
    }

    /// Remove the front record
    ///
    /// A rename arrives as two records. If the only record held is a
    /// [`FileAction::RenamedFrom`], it is withheld until its partner is pushed
    /// so a consumer never sees half a rename in one poll.
    pub fn pop(&self) -> Option<FileChange> {
        let mut ring = self.ring.lock();
        if ring.count == 0 || ring.holds_split_rename() {
            return None;
        }
        let front = ring.front;
        let change = ring.slots[front].take();
        ring.front = (front + 1) % ring.slots.len();
        ring.count -= 1;
        change
    }

    /// Number of records held, including a withheld rename
    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Ring {
    fn holds_split_rename(&self) -> bool {
        self.count == 1
            && matches!(
                self.slots[self.front],
                Some(FileChange { action: FileAction::RenamedFrom, .. })
            )
    }

    /// Move the live range into a larger buffer starting at index 0
    fn grow(&mut self) {
        let capacity = self.slots.len();
        let mut slots = empty_slots(capacity * GROW_RATE);

        // Live range is [front, capacity) followed by [0, front + count - capacity)
        // when it wraps; walking it modulo capacity covers both halves in order.
        for (i, slot) in slots.iter_mut().take(self.count).enumerate() {
            *slot = self.slots[(self.front + i) % capacity].take();
        }

        self.slots = slots;
        self.front = 0;
    }
}

fn empty_slots(capacity: usize) -> Vec<Option<FileChange>> {
    let mut slots = Vec::with_capacity(capacity);
    slots.resize_with(capacity, || None);
    slots
}
