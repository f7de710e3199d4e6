//! Top-level wiring of the specialization subsystem.
//!
//! A `Specializer` owns the worker thread, the dispatch table, the callsite
//! intern table, the instrumentation level, and the diagnostic sink, and
//! hands out per-thread loggers to interpreter threads. Configuration is
//! read once at construction and never changes afterwards.

use std::io;
use std::sync::Arc;

use crate::callsite::CallsiteInternTable;
use crate::config::{SinkDest, SpecConfig};
use crate::deopt::{DeoptHandler, DeoptKind, Resumption};
use crate::dispatch::{DispatchTable, TargetId};
use crate::events::EventSink;
use crate::graph::guard::GuardId;
use crate::graph::SpecGraph;
use crate::instrument::Instrumentation;
use crate::log::thread::ThreadLogger;
use crate::worker::{SpecWorker, WorkerStats};

/// Process-wide specialization subsystem.
pub struct Specializer {
    config: Arc<SpecConfig>,
    events: Arc<EventSink>,
    instrumentation: Arc<Instrumentation>,
    interns: Arc<CallsiteInternTable>,
    dispatch: Arc<DispatchTable>,
    deopt: DeoptHandler,
    worker: Option<SpecWorker>,
}

impl Specializer {
    /// Bring up the subsystem with the given configuration.
    ///
    /// Fails only if a file diagnostic sink cannot be opened. With
    /// specialization disabled no worker thread is started and loggers
    /// handed out by [`Specializer::thread_logger`] are inert.
    pub fn new(config: SpecConfig) -> io::Result<Self> {
        let events = Arc::new(match &config.events {
            SinkDest::Disabled => EventSink::disabled(),
            SinkDest::Stderr => EventSink::stderr(),
            SinkDest::File(path) => EventSink::to_path(path)?,
        });

        let instrumentation = Arc::new(Instrumentation::new());
        // Each active global observation mode adds one entry-time
        // obligation, so each raises the level exactly once.
        if config.cross_thread_write_log {
            instrumentation.raise();
        }
        if config.coverage_log {
            instrumentation.raise();
        }

        let config = Arc::new(config);
        let interns = Arc::new(CallsiteInternTable::with_common());
        let dispatch = Arc::new(DispatchTable::new());
        let deopt = DeoptHandler::new(dispatch.clone(), events.clone());

        let worker = config.enabled.then(|| {
            SpecWorker::start(
                config.clone(),
                dispatch.clone(),
                interns.clone(),
                events.clone(),
            )
        });

        Ok(Specializer {
            config,
            events,
            instrumentation,
            interns,
            dispatch,
            deopt,
            worker,
        })
    }

    /// Bring up the subsystem from the process-wide configuration snapshot,
    /// read from `SELVA_SPEC_*` environment variables on first access and
    /// frozen thereafter.
    pub fn from_env() -> io::Result<Self> {
        Self::new(SpecConfig::global().clone())
    }

    /// Create the observation logger for `target` on the calling thread.
    ///
    /// Called once per thread per profiled frame, before its first
    /// specializable execution.
    pub fn thread_logger(&self, thread_id: u64, target: TargetId) -> ThreadLogger {
        match &self.worker {
            Some(worker) => ThreadLogger::new(thread_id, target, &self.config, worker.submit_handle()),
            None => ThreadLogger::disabled(thread_id, target),
        }
    }

    /// Handle a failed guard in an installed graph.
    pub fn guard_failed(&self, graph: &SpecGraph, guard: GuardId, kind: DeoptKind) -> Resumption {
        self.deopt.guard_failed(graph, guard, kind)
    }

    /// Effective configuration.
    pub fn config(&self) -> &SpecConfig {
        &self.config
    }

    /// The dispatch table consulted on every specializable call.
    pub fn dispatch(&self) -> &Arc<DispatchTable> {
        &self.dispatch
    }

    /// The global instrumentation level.
    pub fn instrumentation(&self) -> &Arc<Instrumentation> {
        &self.instrumentation
    }

    /// The shared callsite intern table.
    pub fn interns(&self) -> &Arc<CallsiteInternTable> {
        &self.interns
    }

    /// The diagnostic sink.
    pub fn events(&self) -> &Arc<EventSink> {
        &self.events
    }

    /// Worker activity counters, when a worker is running.
    pub fn worker_stats(&self) -> Option<&Arc<WorkerStats>> {
        self.worker.as_ref().map(SpecWorker::stats)
    }

    /// Drain the worker queue, stop the worker thread, and release every
    /// non-common interned callsite.
    pub fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        self.interns.clear_uncommon();
    }
}

impl Drop for Specializer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
