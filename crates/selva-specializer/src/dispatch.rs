//! Dispatch table: which specialization, if any, a call to a target runs.
//!
//! Installation is guarded by a lock scoped to the target being updated so
//! unrelated targets specialize concurrently. The lock is held only for the
//! pointer swap; graph construction happens entirely outside it. Readers
//! never see a partially constructed graph: the worker sets the completion
//! marker before handing the graph over, and the swap itself is a single
//! `Arc` store under the slot's write lock.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::graph::SpecGraph;

/// Identifies a specializable routine (a static frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

struct InstallSlot {
    /// Serializes installs for this target only.
    install_lock: Mutex<()>,
    /// The active specialization; `None` means generic dispatch.
    active: RwLock<Option<Arc<SpecGraph>>>,
    /// Install generation counter.
    version: AtomicU32,
    /// Guard failures attributed to this target.
    deopts: AtomicU64,
}

impl InstallSlot {
    fn new() -> Self {
        InstallSlot {
            install_lock: Mutex::new(()),
            active: RwLock::new(None),
            version: AtomicU32::new(0),
            deopts: AtomicU64::new(0),
        }
    }
}

/// Per-target registry of installed specializations.
pub struct DispatchTable {
    slots: DashMap<TargetId, Arc<InstallSlot>>,
}

impl DispatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        DispatchTable {
            slots: DashMap::new(),
        }
    }

    fn slot(&self, target: TargetId) -> Arc<InstallSlot> {
        self.slots
            .entry(target)
            .or_insert_with(|| Arc::new(InstallSlot::new()))
            .clone()
    }

    /// Version the next install for `target` will get.
    pub fn next_version(&self, target: TargetId) -> u32 {
        self.slot(target).version.load(Ordering::Acquire) + 1
    }

    /// Atomically make `graph` the active specialization for `target`.
    /// Returns the new install generation.
    pub fn install(&self, target: TargetId, graph: Arc<SpecGraph>) -> u32 {
        debug_assert!(graph.is_completed());
        let slot = self.slot(target);
        let _installing = slot.install_lock.lock();
        let version = slot.version.fetch_add(1, Ordering::AcqRel) + 1;
        *slot.active.write() = Some(graph);
        version
    }

    /// The active specialization for `target`, or `None` for generic
    /// dispatch. Never blocks on a concurrent install beyond the swap.
    pub fn active(&self, target: TargetId) -> Option<Arc<SpecGraph>> {
        let slot = Arc::clone(self.slots.get(&target)?.value());
        let active = slot.active.read().clone();
        active
    }

    /// Drop the active specialization, reverting `target` to generic
    /// dispatch. Returns whether anything was installed.
    pub fn invalidate(&self, target: TargetId) -> bool {
        let Some(slot) = self.slots.get(&target).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        let _installing = slot.install_lock.lock();
        let had_active = slot.active.write().take().is_some();
        had_active
    }

    /// Record a guard failure against `target`.
    pub fn note_deopt(&self, target: TargetId) -> u64 {
        self.slot(target).deopts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Guard failures attributed to `target` so far.
    pub fn deopt_count(&self, target: TargetId) -> u64 {
        self.slots
            .get(&target)
            .map(|s| s.deopts.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Number of targets currently running a specialization.
    pub fn installed_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.active.read().is_some())
            .count()
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}
