//! Per-thread logging front end.
//!
//! One `ThreadLogger` exists per interpreter thread per profiled frame,
//! created lazily before the first specializable execution. It owns the
//! thread's current log buffer and the legacy per-frame run budget, and is
//! the only writer the buffer ever has.

use crate::config::SpecConfig;
use crate::dispatch::TargetId;
use crate::log::buffer::{Handoff, HandoffReason, LogBuffer};
use crate::log::entry::{LogEntry, ObservationKind, ShapeDescriptor, SiteId};
use crate::worker::SubmitHandle;

/// Per-thread observation logger for one profiled frame.
///
/// All `log_*` methods are O(1), never block, and never allocate after
/// construction. When specialization is disabled they are no-ops.
pub struct ThreadLogger {
    buffer: Option<LogBuffer>,
    submit: Option<SubmitHandle>,
    thread_id: u64,
    target: TargetId,
    capacity: usize,
    runs_left: u32,
    max_runs: u32,
    rearm: bool,
    logging: bool,
}

impl ThreadLogger {
    /// Create a logger for `target` on the thread identified by `thread_id`.
    pub fn new(thread_id: u64, target: TargetId, config: &SpecConfig, submit: SubmitHandle) -> Self {
        ThreadLogger {
            buffer: Some(LogBuffer::new(thread_id, target, config.log_capacity)),
            submit: Some(submit),
            thread_id,
            target,
            capacity: config.log_capacity,
            runs_left: config.max_log_runs,
            max_runs: config.max_log_runs,
            rearm: config.no_delay,
            logging: true,
        }
    }

    /// Create a logger whose `log_*` methods are all no-ops. Used when
    /// specialization is globally disabled.
    pub fn disabled(thread_id: u64, target: TargetId) -> Self {
        ThreadLogger {
            buffer: None,
            submit: None,
            thread_id,
            target,
            capacity: 0,
            runs_left: 0,
            max_runs: 0,
            rearm: false,
            logging: false,
        }
    }

    /// Record the type of argument `index` at `offset`.
    pub fn log_arg_type(&mut self, offset: u32, index: u8, shape: ShapeDescriptor) {
        self.append(offset, ObservationKind::ArgType { index }, shape);
    }

    /// Record a conditional branch outcome at `offset`.
    pub fn log_branch(&mut self, offset: u32, taken: bool) {
        self.append(offset, ObservationKind::Branch { taken }, ShapeDescriptor::default());
    }

    /// Record the resolved callee of the invocation at `offset`.
    pub fn log_invoke(&mut self, offset: u32, callee: TargetId, arity: u8) {
        self.append(
            offset,
            ObservationKind::InvokeTarget { callee, arity },
            ShapeDescriptor::default(),
        );
    }

    /// Record the type of the value returned from the frame.
    pub fn log_return(&mut self, offset: u32, shape: ShapeDescriptor) {
        self.append(offset, ObservationKind::ReturnType, shape);
    }

    /// Record a loop back-edge eligible for on-stack replacement.
    pub fn log_osr_point(&mut self, offset: u32) {
        self.append(offset, ObservationKind::OsrPoint, ShapeDescriptor::default());
    }

    fn append(&mut self, offset: u32, kind: ObservationKind, shape: ShapeDescriptor) {
        if !self.logging {
            return;
        }
        // A full buffer is handed off before the next entry lands, so the
        // replacement starts with exactly the entry that overflowed it.
        if self.buffer.as_ref().map(|b| b.is_full()).unwrap_or(false) {
            self.flush(HandoffReason::Capacity);
        }
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.append(LogEntry {
                site: SiteId::new(self.target, offset),
                kind,
                shape,
            });
        }
    }

    /// Called when the profiled frame returns. Consumes one unit of the
    /// legacy run budget; exhausting it hands off the current buffer and
    /// stops logging (unless no-delay mode re-arms the budget).
    pub fn finish_run(&mut self) {
        if !self.logging || self.runs_left == 0 {
            return;
        }
        self.runs_left -= 1;
        if self.runs_left == 0 {
            self.flush(HandoffReason::RunLimit);
            if self.rearm {
                self.runs_left = self.max_runs;
            } else {
                self.logging = false;
            }
        }
    }

    /// Whether the logger is still collecting observations.
    pub fn is_logging(&self) -> bool {
        self.logging
    }

    /// Logging runs remaining before the legacy cap fires.
    pub fn runs_left(&self) -> u32 {
        self.runs_left
    }

    /// Fill count of the current buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.as_ref().map(LogBuffer::len).unwrap_or(0)
    }

    /// The profiled frame.
    pub fn target(&self) -> TargetId {
        self.target
    }

    fn flush(&mut self, reason: HandoffReason) {
        let Some(submit) = self.submit.as_ref() else {
            return;
        };
        if self.buffer.as_ref().map(|b| b.is_empty()).unwrap_or(true) {
            return;
        }
        let full = self
            .buffer
            .replace(LogBuffer::new(self.thread_id, self.target, self.capacity))
            .unwrap();
        submit.submit(Handoff { buffer: full, reason });
    }
}

impl Drop for ThreadLogger {
    fn drop(&mut self) {
        // Thread termination hands off whatever was collected so far.
        self.flush(HandoffReason::ThreadExit);
    }
}
