//! Deoptimization on guard failure.
//!
//! A failed guard is not an error. The dispatch side transfers control back
//! to the generic interpreted path for the rest of the invocation (or the
//! rest of the current loop iteration, for on-stack replacement frames),
//! attributes the failure to the originating guard record, and moves on.
//! The instrumentation level is never touched here; only global mode changes
//! raise it.

use std::sync::Arc;

use crate::dispatch::DispatchTable;
use crate::events::{EventKind, EventSink};
use crate::graph::guard::GuardId;
use crate::graph::SpecGraph;
use crate::log::entry::SiteId;

/// The execution context in which a guard failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeoptKind {
    /// A guard in a specialized routine entered through normal dispatch.
    Call,
    /// A guard in a loop body entered through on-stack replacement.
    Osr,
}

/// Where the interpreter resumes after a deoptimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumption {
    /// Finish the invocation on the generic path.
    GenericPath {
        /// Site of the failed guard, when still attributable.
        site: Option<SiteId>,
    },
    /// Finish the current loop iteration generically, then re-dispatch.
    ExitLoopIteration {
        /// Site of the failed guard, when still attributable.
        site: Option<SiteId>,
    },
}

impl Resumption {
    /// Attributed failure site, if the guard still resolved.
    pub fn site(&self) -> Option<SiteId> {
        match self {
            Resumption::GenericPath { site } | Resumption::ExitLoopIteration { site } => *site,
        }
    }
}

/// Records guard failures against the dispatch table and the event sink.
pub struct DeoptHandler {
    dispatch: Arc<DispatchTable>,
    events: Arc<EventSink>,
}

impl DeoptHandler {
    pub fn new(dispatch: Arc<DispatchTable>, events: Arc<EventSink>) -> Self {
        DeoptHandler { dispatch, events }
    }

    /// Handle a failed guard in `graph`.
    ///
    /// Returns where the interpreter should resume. The guard id may be
    /// stale if the graph was rebuilt since the caller captured it; the
    /// attribution is then dropped but the deoptimization still proceeds.
    pub fn guard_failed(&self, graph: &SpecGraph, guard: GuardId, kind: DeoptKind) -> Resumption {
        let site = graph.guard_site(guard);
        self.dispatch.note_deopt(graph.target);
        match kind {
            DeoptKind::Call => {
                self.events.record(EventKind::Deopt, graph.target);
                Resumption::GenericPath { site }
            }
            DeoptKind::Osr => {
                self.events.record(EventKind::OsrExit, graph.target);
                Resumption::ExitLoopIteration { site }
            }
        }
    }
}
