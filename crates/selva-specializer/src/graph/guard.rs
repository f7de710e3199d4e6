//! Guard bookkeeping.
//!
//! Every runtime-assumption check inserted into a graph gets a record here
//! so later passes can (a) decide which guards are load-bearing and
//! (b) locate the originating instruction and block for deoptimization.
//! Records are an indexed, owned collection on the graph; nothing in them
//! is a pointer into block storage, so sweeping cannot dangle.

use rustc_hash::FxHashSet;

use crate::graph::{BlockId, GuardKind, InsId, SpecGraph, SpecOp};
use crate::log::entry::SiteId;

/// Index of a guard in its graph's guard set. Invalidated by
/// [`SpecGraph::sweep_unused`], which compacts the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuardId(pub u32);

/// Record of one inserted guard instruction.
#[derive(Debug, Clone)]
pub struct GuardRecord {
    /// The guard instruction.
    pub ins: InsId,
    /// Identity of the containing block.
    pub block: BlockId,
    /// Set once a downstream pass proves the guard is load-bearing.
    pub used: bool,
}

impl SpecGraph {
    /// Insert a guard checking `kind` at `site` into `block`. Always
    /// succeeds; the record starts out unused.
    pub fn insert_guard(&mut self, block: BlockId, site: SiteId, kind: GuardKind) -> GuardId {
        let ins = self.push_ins(block, SpecOp::Guard { site, kind });
        let guards = self.guards_mut();
        let id = GuardId(guards.len() as u32);
        guards.push(GuardRecord {
            ins,
            block,
            used: false,
        });
        id
    }

    /// Mark a guard as load-bearing. Idempotent; called by analysis passes,
    /// never by the guard's own runtime check.
    pub fn mark_used(&mut self, guard: GuardId) {
        if let Some(record) = self.guards_mut().get_mut(guard.0 as usize) {
            record.used = true;
        }
    }

    /// Look up a guard record by id.
    pub fn guard(&self, guard: GuardId) -> Option<&GuardRecord> {
        self.guards().get(guard.0 as usize)
    }

    /// Remove every guard whose `used` flag is still false, rewriting the
    /// owning blocks' instruction sequences. Guards over dead blocks are
    /// removed without touching block state. Returns the number removed.
    ///
    /// Must run before any layout-dependent consumer of the graph, and it
    /// invalidates previously handed out [`GuardId`]s.
    pub fn sweep_unused(&mut self) -> usize {
        let doomed: Vec<(InsId, BlockId)> = self
            .guards()
            .iter()
            .filter(|g| !g.used)
            .map(|g| (g.ins, g.block))
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        let doomed_ins: FxHashSet<InsId> = doomed.iter().map(|(ins, _)| *ins).collect();
        for block in self.blocks_mut().iter_mut() {
            if block.is_dead() {
                continue;
            }
            block.instrs.retain(|ins| !doomed_ins.contains(&ins.id));
        }
        self.guards_mut().retain(|g| g.used);
        doomed.len()
    }
}

/// Mark the first guard for each (site, assumption) pair as load-bearing.
///
/// A guard repeating an assumption already established earlier in block
/// order proves nothing and is left unused, so the following sweep removes
/// it.
pub fn mark_load_bearing_guards(graph: &mut SpecGraph) {
    let mut seen: Vec<(SiteId, GuardKind)> = Vec::new();
    let mut used: Vec<GuardId> = Vec::new();

    for block in graph.blocks() {
        if block.is_dead() {
            continue;
        }
        for ins in &block.instrs {
            let SpecOp::Guard { site, kind } = &ins.op else {
                continue;
            };
            let key = (*site, *kind);
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            if let Some(index) = graph.guards().iter().position(|g| g.ins == ins.id) {
                used.push(GuardId(index as u32));
            }
        }
    }
    for id in used {
        graph.mark_used(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TargetId;
    use crate::log::entry::ShapeDescriptor;

    fn site(offset: u32) -> SiteId {
        SiteId::new(TargetId(1), offset)
    }

    #[test]
    fn test_unused_guard_is_swept() {
        let mut graph = SpecGraph::new(TargetId(1), 1);
        let b0 = graph.add_block();
        graph.insert_guard(b0, site(0), GuardKind::Branch(true));

        assert_eq!(graph.sweep_unused(), 1);
        assert!(graph.guards().is_empty());
        assert!(graph.block(b0).unwrap().instrs.is_empty());
    }

    #[test]
    fn test_used_guard_is_preserved() {
        let mut graph = SpecGraph::new(TargetId(1), 1);
        let b0 = graph.add_block();
        let keep = graph.insert_guard(b0, site(0), GuardKind::Branch(true));
        graph.insert_guard(b0, site(4), GuardKind::Branch(false));
        graph.mark_used(keep);
        graph.mark_used(keep); // idempotent

        assert_eq!(graph.sweep_unused(), 1);
        assert_eq!(graph.guards().len(), 1);
        assert!(graph.guards()[0].used);
        assert_eq!(graph.block(b0).unwrap().instrs.len(), 1);
    }

    #[test]
    fn test_sweep_ignores_dead_block_contents() {
        let mut graph = SpecGraph::new(TargetId(1), 1);
        let b0 = graph.add_block();
        let b1 = graph.add_block();
        graph.insert_guard(b0, site(0), GuardKind::Branch(true));
        graph.insert_guard(b1, site(8), GuardKind::Branch(true));
        graph.mark_block_dead(b1);

        // Both guards are unused; the one over the dead block must go
        // without its block being dereferenced for rewriting.
        assert_eq!(graph.sweep_unused(), 2);
        assert!(graph.guards().is_empty());
        assert!(graph.block(b1).unwrap().is_dead());
    }

    #[test]
    fn test_sweep_rewrites_only_guard_ins() {
        let mut graph = SpecGraph::new(TargetId(1), 1);
        let b0 = graph.add_block();
        graph.push_ins(b0, SpecOp::Entry);
        graph.insert_guard(b0, site(0), GuardKind::Shape(ShapeDescriptor::concrete(2)));
        graph.push_ins(b0, SpecOp::Return);

        assert_eq!(graph.sweep_unused(), 1);
        let ops: Vec<&SpecOp> = graph.block(b0).unwrap().instrs.iter().map(|i| &i.op).collect();
        assert_eq!(ops, vec![&SpecOp::Entry, &SpecOp::Return]);
    }

    #[test]
    fn test_first_guard_marked_duplicate_swept() {
        let mut graph = SpecGraph::new(TargetId(1), 1);
        let b0 = graph.add_block();
        graph.insert_guard(b0, site(0), GuardKind::Callee(TargetId(3)));
        graph.insert_guard(b0, site(0), GuardKind::Callee(TargetId(3)));
        graph.insert_guard(b0, site(4), GuardKind::Branch(true));

        mark_load_bearing_guards(&mut graph);
        assert_eq!(graph.sweep_unused(), 1);
        assert_eq!(graph.guards().len(), 2);
        assert!(graph.guards().iter().all(|g| g.used));
    }
}
