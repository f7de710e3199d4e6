//! Observation logging: entries, per-thread buffers, and the thread-side
//! logging front end.
//!
//! The interpreter appends entries to its thread's buffer; full buffers are
//! handed off by ownership transfer to the specialization worker.

pub mod buffer;
pub mod entry;
pub mod thread;

pub use buffer::{Handoff, HandoffReason, LogBuffer};
pub use entry::{LogEntry, ObservationKind, ShapeDescriptor, SiteId};
pub use thread::ThreadLogger;
