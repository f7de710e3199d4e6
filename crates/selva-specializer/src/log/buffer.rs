//! Bounded, append-only observation buffers.
//!
//! A buffer is owned by exactly one interpreter thread while it is being
//! filled. Handoff to the specialization worker moves the buffer by value,
//! so the former owner can never touch it again.

use crate::dispatch::TargetId;
use crate::log::entry::LogEntry;

/// Why a buffer was handed to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffReason {
    /// The buffer reached capacity.
    Capacity,
    /// The profiled frame finished its last scheduled logging run.
    RunLimit,
    /// The owning thread terminated with a partially filled buffer.
    ThreadExit,
}

/// A filled (or partially filled) buffer en route to the worker.
#[derive(Debug)]
pub struct Handoff {
    /// The buffer itself, moved out of the owning thread.
    pub buffer: LogBuffer,
    /// What triggered the handoff.
    pub reason: HandoffReason,
}

/// Append-only sequence of observation entries for one profiled frame.
#[derive(Debug)]
pub struct LogBuffer {
    entries: Vec<LogEntry>,
    capacity: usize,
    thread_id: u64,
    target: TargetId,
}

impl LogBuffer {
    /// Allocate a buffer of `capacity` entries for `target`, owned by the
    /// thread identified by `thread_id`.
    pub fn new(thread_id: u64, target: TargetId, capacity: usize) -> Self {
        LogBuffer {
            entries: Vec::with_capacity(capacity),
            capacity,
            thread_id,
            target,
        }
    }

    /// Append an entry. O(1) and allocation-free once the buffer exists.
    ///
    /// The caller must check [`LogBuffer::is_full`] before appending; a full
    /// buffer must be handed off, not grown. Entries appended past capacity
    /// are dropped rather than growing the allocation.
    pub fn append(&mut self, entry: LogEntry) {
        if self.is_full() {
            return;
        }
        self.entries.push(entry);
    }

    /// Whether the buffer has reached capacity.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Number of entries written so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries have been written.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity in entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Id of the thread that owned this buffer while it was being filled.
    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    /// The profiled frame.
    pub fn target(&self) -> TargetId {
        self.target
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }
}
