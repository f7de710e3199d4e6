//! Background specialization worker.
//!
//! A single consumer thread pulls completed log buffers off a bounded
//! queue, distills them into per-site observation summaries, builds a
//! guarded specialization graph, and installs it through the dispatch
//! table. Interpreter threads never wait on the worker: submission is
//! non-blocking (the oldest pending buffer is dropped under sustained
//! overload) and the generic path is always available as a fallback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use rustc_hash::FxHashMap;

use crate::callsite::{Callsite, CallsiteInternTable};
use crate::config::SpecConfig;
use crate::defaults::WORKER_IDLE_WAIT_MS;
use crate::dispatch::{DispatchTable, TargetId};
use crate::events::{EventKind, EventSink};
use crate::graph::guard::mark_load_bearing_guards;
use crate::graph::{GraphError, GuardKind, SpecGraph, SpecOp};
use crate::log::buffer::{Handoff, LogBuffer};
use crate::log::entry::{ObservationKind, ShapeDescriptor, SiteId};

/// Counters describing worker activity. All relaxed; read by tests and
/// diagnostics, not by any decision on the hot path (the install limit is
/// worker-private, so relaxed reads are exact there).
#[derive(Debug, Default)]
pub struct WorkerStats {
    submitted: AtomicU64,
    dropped: AtomicU64,
    drained: AtomicU64,
    installed: AtomicU64,
    rejected: AtomicU64,
}

impl WorkerStats {
    /// Buffers handed to `submit`.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Buffers dropped because the queue was saturated.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Buffers consumed by the worker (including pass-through drains).
    pub fn drained(&self) -> u64 {
        self.drained.load(Ordering::Relaxed)
    }

    /// Graphs successfully installed.
    pub fn installed(&self) -> u64 {
        self.installed.load(Ordering::Relaxed)
    }

    /// Candidate graphs discarded by validation.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Cloneable submission side of the worker queue.
///
/// `submit` transfers buffer ownership into the queue and never blocks the
/// calling interpreter thread: when the queue is full, the oldest pending
/// buffer is dropped to make room. Correctness does not depend on observing
/// every entry, only on bounded staleness.
#[derive(Clone)]
pub struct SubmitHandle {
    tx: Sender<Handoff>,
    overflow: Receiver<Handoff>,
    stats: Arc<WorkerStats>,
    events: Arc<EventSink>,
}

impl SubmitHandle {
    fn new(
        tx: Sender<Handoff>,
        overflow: Receiver<Handoff>,
        stats: Arc<WorkerStats>,
        events: Arc<EventSink>,
    ) -> Self {
        SubmitHandle {
            tx,
            overflow,
            stats,
            events,
        }
    }

    /// A handle wired to a bare queue with no worker behind it, plus the
    /// receiving end. Lets logger tests observe handoffs directly.
    #[cfg(test)]
    pub(crate) fn for_tests(capacity: usize) -> (Self, Receiver<Handoff>) {
        let (tx, rx) = bounded(capacity);
        let handle = SubmitHandle::new(
            tx,
            rx.clone(),
            Arc::new(WorkerStats::default()),
            Arc::new(EventSink::disabled()),
        );
        (handle, rx)
    }

    /// Enqueue a buffer for the worker.
    pub fn submit(&self, handoff: Handoff) {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        let mut pending = handoff;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    // Make room by sacrificing the oldest pending buffer.
                    if let Ok(oldest) = self.overflow.try_recv() {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        self.events
                            .record(EventKind::BufferDropped, oldest.buffer.target());
                    }
                    pending = back;
                }
                Err(TrySendError::Disconnected(_)) => {
                    // Worker already gone; the buffer is simply abandoned.
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
    }

    /// Shared activity counters.
    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }
}

/// Per-site distillation of a buffer's entries.
#[derive(Debug, Default)]
struct SiteProfile {
    hits: u32,
    shape: Option<ShapeDescriptor>,
    shape_poly: bool,
    callee: Option<(TargetId, u8)>,
    callee_poly: bool,
    taken_true: u32,
    taken_false: u32,
    osr: bool,
}

impl SiteProfile {
    fn observe_shape(&mut self, shape: ShapeDescriptor) {
        match self.shape {
            None => self.shape = Some(shape),
            Some(seen) if seen != shape => self.shape_poly = true,
            Some(_) => {}
        }
    }

    fn monomorphic_shape(&self) -> Option<ShapeDescriptor> {
        if self.shape_poly {
            None
        } else {
            self.shape
        }
    }

    fn monomorphic_callee(&self) -> Option<(TargetId, u8)> {
        if self.callee_poly {
            None
        } else {
            self.callee
        }
    }

    fn constant_branch(&self) -> Option<bool> {
        match (self.taken_true, self.taken_false) {
            (0, 0) => None,
            (_, 0) => Some(true),
            (0, _) => Some(false),
            _ => None,
        }
    }
}

/// Collapse a buffer into per-site profiles, keyed and ordered by site.
fn summarize(buffer: &LogBuffer) -> Vec<(SiteId, SiteProfile)> {
    let mut sites: FxHashMap<SiteId, SiteProfile> = FxHashMap::default();
    for entry in buffer.entries() {
        let profile = sites.entry(entry.site).or_default();
        profile.hits += 1;
        match entry.kind {
            ObservationKind::ArgType { .. } | ObservationKind::ReturnType => {
                profile.observe_shape(entry.shape);
            }
            ObservationKind::Branch { taken } => {
                if taken {
                    profile.taken_true += 1;
                } else {
                    profile.taken_false += 1;
                }
            }
            ObservationKind::InvokeTarget { callee, arity } => match profile.callee {
                None => profile.callee = Some((callee, arity)),
                Some((seen, _)) if seen != callee => profile.callee_poly = true,
                Some(_) => {}
            },
            ObservationKind::OsrPoint => profile.osr = true,
        }
    }
    let mut sites: Vec<_> = sites.into_iter().collect();
    sites.sort_by_key(|(site, _)| *site);
    sites
}

/// Shapes observed for each argument index of the profiled frame, used to
/// intern callsites for its invocations.
fn arg_shapes(buffer: &LogBuffer) -> FxHashMap<u8, ShapeDescriptor> {
    let mut shapes: FxHashMap<u8, ShapeDescriptor> = FxHashMap::default();
    for entry in buffer.entries() {
        if let ObservationKind::ArgType { index } = entry.kind {
            shapes.entry(index).or_insert(entry.shape);
        }
    }
    shapes
}

/// Build a candidate specialization graph from a drained buffer.
fn build_graph(
    buffer: &LogBuffer,
    version: u32,
    config: &SpecConfig,
    interns: &CallsiteInternTable,
) -> Result<SpecGraph, GraphError> {
    let target = buffer.target();
    let threshold = config.site_hit_threshold();
    let sites = summarize(buffer);
    let frame_args = arg_shapes(buffer);

    let mut graph = SpecGraph::new(target, version);
    let body = graph.add_block();
    graph.push_ins(body, SpecOp::Entry);

    for (site, profile) in &sites {
        if profile.hits < threshold {
            continue;
        }
        if let Some(taken) = profile.constant_branch() {
            graph.insert_guard(body, *site, GuardKind::Branch(taken));
        }
        if let Some(shape) = profile.monomorphic_shape() {
            graph.insert_guard(body, *site, GuardKind::Shape(shape));
        }
        if let Some((callee, arity)) = profile.monomorphic_callee() {
            graph.insert_guard(body, *site, GuardKind::Callee(callee));
            let shapes = (0..arity)
                .map(|index| frame_args.get(&index).copied().unwrap_or_default())
                .collect();
            let callsite = interns.intern(Callsite::new(shapes));
            graph.push_ins(
                body,
                SpecOp::Invoke {
                    site: *site,
                    callee: Some(callee),
                    callsite,
                },
            );
            if config.inline_enabled {
                graph.add_inline_candidate(callee);
            }
        }
        if profile.osr && config.osr_enabled {
            graph.push_ins(body, SpecOp::OsrEntry { site: *site });
        }
    }
    graph.push_ins(body, SpecOp::Return);

    if graph.guards().is_empty() {
        return Err(GraphError::NoObservations(target));
    }

    mark_load_bearing_guards(&mut graph);
    graph.sweep_unused();
    graph.complete();
    graph.validate()?;
    Ok(graph)
}

/// The background consumer thread.
pub struct SpecWorker {
    submit: SubmitHandle,
    stats: Arc<WorkerStats>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SpecWorker {
    /// Start the worker thread.
    pub fn start(
        config: Arc<SpecConfig>,
        dispatch: Arc<DispatchTable>,
        interns: Arc<CallsiteInternTable>,
        events: Arc<EventSink>,
    ) -> Self {
        let (tx, rx) = bounded(config.queue_capacity);
        let stats = Arc::new(WorkerStats::default());
        let submit = SubmitHandle::new(tx, rx.clone(), stats.clone(), events.clone());
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let stats = stats.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("selva-spec-worker".to_string())
                .spawn(move || {
                    Self::run_loop(rx, config, dispatch, interns, events, stats, shutdown);
                })
                .expect("Failed to spawn specialization worker thread")
        };

        SpecWorker {
            submit,
            stats,
            shutdown,
            handle: Some(handle),
        }
    }

    fn run_loop(
        rx: Receiver<Handoff>,
        config: Arc<SpecConfig>,
        dispatch: Arc<DispatchTable>,
        interns: Arc<CallsiteInternTable>,
        events: Arc<EventSink>,
        stats: Arc<WorkerStats>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            match rx.recv_timeout(Duration::from_millis(WORKER_IDLE_WAIT_MS)) {
                Ok(handoff) => {
                    Self::process(handoff, &config, &dispatch, &interns, &events, &stats);
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Drain everything already queued before honoring a
                    // shutdown request.
                    if shutdown.load(Ordering::Acquire) && rx.is_empty() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process(
        handoff: Handoff,
        config: &SpecConfig,
        dispatch: &DispatchTable,
        interns: &CallsiteInternTable,
        events: &EventSink,
        stats: &WorkerStats,
    ) {
        stats.drained.fetch_add(1, Ordering::Relaxed);

        // Past the install limit the worker is a pass-through drain:
        // buffers are consumed and freed without producing graphs.
        if let Some(limit) = config.limit {
            if stats.installed() >= u64::from(limit) {
                return;
            }
        }

        let target = handoff.buffer.target();
        let version = dispatch.next_version(target);
        match build_graph(&handoff.buffer, version, config, interns) {
            Ok(graph) => {
                dispatch.install(target, Arc::new(graph));
                stats.installed.fetch_add(1, Ordering::Relaxed);
                events.record(EventKind::Specialized, target);
            }
            Err(_) => {
                // Never fatal: keep the previous dispatch target and note
                // the failure for diagnostics.
                stats.rejected.fetch_add(1, Ordering::Relaxed);
                events.record(EventKind::GraphRejected, target);
            }
        }
    }

    /// A cloneable submission handle for interpreter threads.
    pub fn submit_handle(&self) -> SubmitHandle {
        self.submit.clone()
    }

    /// Worker activity counters.
    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    /// Signal shutdown and join the worker after it drains the queue.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.join().expect("Failed to join specialization worker thread");
        }
    }
}

impl Drop for SpecWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
