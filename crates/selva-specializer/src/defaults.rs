//! Default constants for the specialization subsystem.
//!
//! Centralizes the magic numbers shared between the logger, the worker,
//! and the intern table.

/// Default number of entries collected into a thread's log buffer before it
/// is handed to the specialization worker.
pub const LOG_DEFAULT_ENTRIES: usize = 4096;

/// Legacy cap on the number of logged runs per profiled frame. Bounds total
/// logging overhead for very hot call sites that never fill a buffer.
pub const LOG_MAX_RUNS: u32 = 8;

/// Bounded capacity of the worker's inbound buffer queue. Under sustained
/// overload the oldest pending buffer is dropped rather than blocking the
/// submitting interpreter thread.
pub const WORKER_QUEUE_CAPACITY: usize = 64;

/// Highest callsite arity that gets its own intern bucket. Callsites with
/// more arguments than this are not interned.
pub const INTERN_ARITY_LIMIT: usize = 8;

/// Minimum observation count at a site before it is worth guarding.
/// Ignored in no-delay mode.
pub const MIN_SITE_HITS: u32 = 2;

/// How long the worker sleeps on an empty queue before re-checking the
/// shutdown flag.
pub const WORKER_IDLE_WAIT_MS: u64 = 10;
