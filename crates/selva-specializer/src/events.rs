//! Diagnostic event sink.
//!
//! Optional append-only trace of specialization and deoptimization events,
//! kept entirely off the hot path. One line per event, flushed eagerly so
//! the trace survives a crash. Disabled by default; when disabled,
//! recording is a single branch.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::dispatch::TargetId;

/// Kind of diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A specialization was installed for the target.
    Specialized,
    /// A candidate graph failed validation and was discarded.
    GraphRejected,
    /// A guard failed during a specialized call.
    Deopt,
    /// A guard failed inside an OSR'd loop.
    OsrExit,
    /// The worker queue overflowed and the oldest pending buffer was
    /// dropped.
    BufferDropped,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Specialized => "specialized",
            EventKind::GraphRejected => "rejected",
            EventKind::Deopt => "deopt",
            EventKind::OsrExit => "osr-exit",
            EventKind::BufferDropped => "buffer-dropped",
        };
        f.write_str(name)
    }
}

/// Append-only diagnostic sink with a monotonic sequence number.
pub struct EventSink {
    out: Option<Mutex<Box<dyn Write + Send>>>,
    seq: AtomicU64,
}

impl EventSink {
    /// A sink that discards everything.
    pub fn disabled() -> Self {
        EventSink {
            out: None,
            seq: AtomicU64::new(0),
        }
    }

    /// A sink writing to standard error.
    pub fn stderr() -> Self {
        EventSink {
            out: Some(Mutex::new(Box::new(io::stderr()))),
            seq: AtomicU64::new(0),
        }
    }

    /// A sink writing to `path`. A single `%d` directive in the path is
    /// substituted with the process id, so per-process trace files can be
    /// configured for forking programs.
    pub fn to_path(path: &str) -> io::Result<Self> {
        let file = File::create(expand_pid(path))?;
        Ok(EventSink {
            out: Some(Mutex::new(Box::new(file))),
            seq: AtomicU64::new(0),
        })
    }

    /// A sink writing into an arbitrary writer (used by tests).
    pub fn to_writer(writer: Box<dyn Write + Send>) -> Self {
        EventSink {
            out: Some(Mutex::new(writer)),
            seq: AtomicU64::new(0),
        }
    }

    /// Whether events are actually being written anywhere.
    pub fn is_enabled(&self) -> bool {
        self.out.is_some()
    }

    /// Append one event line and flush. Write failures are swallowed; the
    /// trace is diagnostic, never load-bearing.
    pub fn record(&self, kind: EventKind, target: TargetId) {
        let Some(out) = &self.out else {
            return;
        };
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut writer = out.lock();
        let _ = writeln!(writer, "{} {} target={}", seq, kind, target.0);
        let _ = writer.flush();
    }

    /// Events recorded so far.
    pub fn recorded(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}

/// Substitute a single `%d` directive in `path` with the process id.
/// Paths with more than one directive are used literally; `%%` escapes a
/// percent sign and does not count.
fn expand_pid(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut directives = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'%' {
                i += 2;
                continue;
            }
            directives += 1;
        }
        i += 1;
    }
    if directives == 1 && path.contains("%d") {
        path.replacen("%d", &std::process::id().to_string(), 1)
    } else {
        path.to_string()
    }
}
