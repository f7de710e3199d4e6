//! Specialization graphs.
//!
//! A graph is the worker's candidate replacement for a frame's generic
//! bytecode: blocks of instructions annotated with runtime-assumption
//! guards. The worker builds and mutates a graph privately; once installed
//! it is shared behind an `Arc` and treated as immutable by readers.

pub mod guard;

use thiserror::Error;

use crate::callsite::CallsiteId;
use crate::dispatch::TargetId;
use crate::log::entry::{ShapeDescriptor, SiteId};

pub use guard::{GuardId, GuardRecord};

/// Stable identity of a block. Identity survives reordering; bookkeeping
/// that outlives optimization passes must key on this, never on position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Identity of one instruction within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InsId(pub u32);

/// The runtime assumption a guard instruction checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    /// Value at the site has the given shape.
    Shape(ShapeDescriptor),
    /// Branch at the site resolves to the given outcome.
    Branch(bool),
    /// Invocation at the site resolves to the given callee.
    Callee(TargetId),
}

/// Instruction in a specialization graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecOp {
    /// Frame entry.
    Entry,
    /// Runtime-assumption check; failure deoptimizes.
    Guard {
        /// Site the assumption was observed at.
        site: SiteId,
        /// The assumption.
        kind: GuardKind,
    },
    /// Specialized invocation.
    Invoke {
        /// The invocation site.
        site: SiteId,
        /// Resolved callee, when the site was monomorphic.
        callee: Option<TargetId>,
        /// Interned argument-shape descriptor.
        callsite: Option<CallsiteId>,
    },
    /// Loop entry point reachable by on-stack replacement.
    OsrEntry {
        /// The back-edge site.
        site: SiteId,
    },
    /// Frame return.
    Return,
}

/// One instruction with its graph-wide identity.
#[derive(Debug, Clone)]
pub struct SpecIns {
    /// Identity, unique within the graph.
    pub id: InsId,
    /// The operation.
    pub op: SpecOp,
}

/// A control-flow block.
#[derive(Debug, Clone)]
pub struct SpecBlock {
    /// Stable identity.
    pub id: BlockId,
    /// Instruction sequence.
    pub instrs: Vec<SpecIns>,
    /// Successor block identities.
    pub succ: Vec<BlockId>,
    dead: bool,
}

impl SpecBlock {
    /// Whether the block was merged away or deleted by an earlier pass.
    pub fn is_dead(&self) -> bool {
        self.dead
    }
}

/// Consistency failures detected by [`SpecGraph::validate`].
#[derive(Debug, Error)]
pub enum GraphError {
    /// The buffer held nothing worth specializing on.
    #[error("no specializable observations for target {0:?}")]
    NoObservations(TargetId),
    /// The completion marker was not the last field written.
    #[error("graph for target {0:?} validated before completion")]
    NotCompleted(TargetId),
    /// A successor edge names a block that does not exist or is dead.
    #[error("block {0:?} has a successor edge to missing or dead block {1:?}")]
    BadSuccessor(BlockId, BlockId),
    /// A guard record points at an instruction its block does not contain.
    #[error("guard {0} dangles: instruction {1:?} not in live block {2:?}")]
    DanglingGuard(usize, InsId, BlockId),
}

/// Candidate specialization of one frame.
#[derive(Debug)]
pub struct SpecGraph {
    /// The frame this graph specializes.
    pub target: TargetId,
    /// Install generation for the target, assigned by the worker.
    pub version: u32,
    blocks: Vec<SpecBlock>,
    guards: Vec<GuardRecord>,
    inline_candidates: Vec<TargetId>,
    next_block: u32,
    next_ins: u32,
    completed: bool,
}

impl SpecGraph {
    /// Create an empty graph for `target`.
    pub fn new(target: TargetId, version: u32) -> Self {
        SpecGraph {
            target,
            version,
            blocks: Vec::new(),
            guards: Vec::new(),
            inline_candidates: Vec::new(),
            next_block: 0,
            next_ins: 0,
            completed: false,
        }
    }

    /// Append a new empty block and return its identity.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        self.blocks.push(SpecBlock {
            id,
            instrs: Vec::new(),
            succ: Vec::new(),
            dead: false,
        });
        id
    }

    /// Append `op` to `block` and return the instruction's identity.
    pub fn push_ins(&mut self, block: BlockId, op: SpecOp) -> InsId {
        let id = InsId(self.next_ins);
        self.next_ins += 1;
        let block = self
            .block_mut(block)
            .expect("push_ins into a block this graph owns");
        block.instrs.push(SpecIns { id, op });
        id
    }

    /// Set the successor edges of `block`.
    pub fn set_successors(&mut self, block: BlockId, succ: Vec<BlockId>) {
        if let Some(block) = self.block_mut(block) {
            block.succ = succ;
        }
    }

    /// Mark a block as merged away or deleted. Its instructions are gone;
    /// bookkeeping that still references the block must not dereference it.
    pub fn mark_block_dead(&mut self, block: BlockId) {
        if let Some(block) = self.block_mut(block) {
            block.dead = true;
            block.instrs.clear();
            block.succ.clear();
        }
    }

    /// Look up a block by identity.
    pub fn block(&self, id: BlockId) -> Option<&SpecBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    fn block_mut(&mut self, id: BlockId) -> Option<&mut SpecBlock> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    /// All blocks, live and dead, in creation order.
    pub fn blocks(&self) -> &[SpecBlock] {
        &self.blocks
    }

    /// The guard set, indexed by [`GuardId`].
    pub fn guards(&self) -> &[GuardRecord] {
        &self.guards
    }

    pub(crate) fn guards_mut(&mut self) -> &mut Vec<GuardRecord> {
        &mut self.guards
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut Vec<SpecBlock> {
        &mut self.blocks
    }

    /// Record `callee` as an inlining candidate.
    pub fn add_inline_candidate(&mut self, callee: TargetId) {
        if !self.inline_candidates.contains(&callee) {
            self.inline_candidates.push(callee);
        }
    }

    /// Callees considered for inlining.
    pub fn inline_candidates(&self) -> &[TargetId] {
        &self.inline_candidates
    }

    /// Set the completion marker. Must be the last mutation before the
    /// graph is shared; readers use it to distinguish a fully built graph.
    pub fn complete(&mut self) {
        self.completed = true;
    }

    /// Whether the completion marker is set.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Internal consistency check run by the worker before install.
    pub fn validate(&self) -> Result<(), GraphError> {
        if !self.completed {
            return Err(GraphError::NotCompleted(self.target));
        }
        for block in &self.blocks {
            if block.dead {
                continue;
            }
            for succ in &block.succ {
                let live = self.block(*succ).map(|b| !b.is_dead()).unwrap_or(false);
                if !live {
                    return Err(GraphError::BadSuccessor(block.id, *succ));
                }
            }
        }
        for (index, guard) in self.guards.iter().enumerate() {
            let Some(block) = self.block(guard.block) else {
                return Err(GraphError::DanglingGuard(index, guard.ins, guard.block));
            };
            if block.is_dead() {
                // Guards over dead blocks are legal until sweep removes them.
                continue;
            }
            if !block.instrs.iter().any(|ins| ins.id == guard.ins) {
                return Err(GraphError::DanglingGuard(index, guard.ins, guard.block));
            }
        }
        Ok(())
    }

    /// Site guarded by `guard`, for deoptimization attribution.
    pub fn guard_site(&self, guard: GuardId) -> Option<SiteId> {
        let record = self.guards.get(guard.0 as usize)?;
        let block = self.block(record.block)?;
        block.instrs.iter().find_map(|ins| match &ins.op {
            SpecOp::Guard { site, .. } if ins.id == record.ins => Some(*site),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(offset: u32) -> SiteId {
        SiteId::new(TargetId(1), offset)
    }

    #[test]
    fn test_block_identity_survives_death() {
        let mut graph = SpecGraph::new(TargetId(1), 1);
        let b0 = graph.add_block();
        let b1 = graph.add_block();
        graph.push_ins(b1, SpecOp::Return);
        graph.mark_block_dead(b0);

        assert!(graph.block(b0).unwrap().is_dead());
        assert!(!graph.block(b1).unwrap().is_dead());
        assert_eq!(graph.block(b1).unwrap().instrs.len(), 1);
    }

    #[test]
    fn test_validate_requires_completion_marker() {
        let mut graph = SpecGraph::new(TargetId(1), 1);
        let b0 = graph.add_block();
        graph.push_ins(b0, SpecOp::Return);
        assert!(matches!(graph.validate(), Err(GraphError::NotCompleted(_))));

        graph.complete();
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_edge_to_dead_block() {
        let mut graph = SpecGraph::new(TargetId(1), 1);
        let b0 = graph.add_block();
        let b1 = graph.add_block();
        graph.set_successors(b0, vec![b1]);
        graph.mark_block_dead(b1);
        graph.complete();
        assert!(matches!(graph.validate(), Err(GraphError::BadSuccessor(..))));
    }

    #[test]
    fn test_guard_site_attribution() {
        let mut graph = SpecGraph::new(TargetId(1), 1);
        let b0 = graph.add_block();
        let guard = graph.insert_guard(b0, site(12), GuardKind::Branch(true));
        assert_eq!(graph.guard_site(guard), Some(site(12)));
    }

    #[test]
    fn test_inline_candidates_deduplicated() {
        let mut graph = SpecGraph::new(TargetId(1), 1);
        graph.add_inline_candidate(TargetId(7));
        graph.add_inline_candidate(TargetId(7));
        assert_eq!(graph.inline_candidates(), &[TargetId(7)]);
    }
}
