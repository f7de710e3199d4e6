//! Adaptive specialization for the Selva virtual machine.
//!
//! The interpreter profiles hot frames into per-thread observation logs;
//! a background worker distills those logs into guarded specialization
//! graphs and installs them atomically per target. Guard failures
//! deoptimize back to the generic path, which is always available.
//!
//! The crate is organized around the lifecycle of an observation:
//!
//! - [`log`] collects entries into bounded per-thread buffers and hands
//!   full buffers to the worker.
//! - [`worker`] drains buffers, builds [`graph`] candidates, and installs
//!   them through [`dispatch`].
//! - [`deopt`] resolves guard failures at runtime.
//! - [`instrument`] forces frame re-verification when a global observation
//!   mode activates.
//! - [`config`], [`events`], and [`callsite`] carry the process-wide
//!   toggles, the diagnostic trace, and the interned argument shapes.
//!
//! [`Specializer`] wires the pieces together and is the only type most
//! embedders need.

pub mod callsite;
pub mod config;
pub mod defaults;
pub mod deopt;
pub mod dispatch;
pub mod events;
pub mod graph;
pub mod instrument;
pub mod log;
pub mod specializer;
pub mod worker;

pub use callsite::{Callsite, CallsiteId, CallsiteInternTable};
pub use config::{SinkDest, SpecConfig, SpecConfigBuilder};
pub use deopt::{DeoptHandler, DeoptKind, Resumption};
pub use dispatch::{DispatchTable, TargetId};
pub use events::{EventKind, EventSink};
pub use graph::guard::{GuardId, GuardRecord};
pub use graph::{BlockId, GraphError, GuardKind, InsId, SpecGraph, SpecOp};
pub use instrument::{FrameStamp, Instrumentation};
pub use log::buffer::{Handoff, HandoffReason, LogBuffer};
pub use log::entry::{LogEntry, ObservationKind, ShapeDescriptor, SiteId};
pub use log::thread::ThreadLogger;
pub use specializer::Specializer;
pub use worker::{SpecWorker, SubmitHandle, WorkerStats};
