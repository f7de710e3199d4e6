//! Observation log entries.
//!
//! Each entry records one fact observed at a specific bytecode site during
//! one interpreted execution. Entries are append-only: once written into a
//! buffer they are never mutated.

use crate::dispatch::TargetId;

/// Identifies one observation site: a profiled frame plus the bytecode
/// offset of the observing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteId {
    /// The frame (specialization target) containing the site.
    pub frame: TargetId,
    /// Bytecode offset within the frame.
    pub offset: u32,
}

impl SiteId {
    /// Create a site id for `offset` within `frame`.
    pub fn new(frame: TargetId, offset: u32) -> Self {
        SiteId { frame, offset }
    }
}

/// Compact summary of an observed value's shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeDescriptor {
    /// Runtime type id of the observed value.
    pub type_id: u32,
    /// Whether the value was a concrete object (as opposed to a type object).
    pub concrete: bool,
    /// Whether the value was held in a container.
    pub container: bool,
}

impl ShapeDescriptor {
    /// Shape of a concrete, uncontained value of `type_id`.
    pub fn concrete(type_id: u32) -> Self {
        ShapeDescriptor {
            type_id,
            concrete: true,
            container: false,
        }
    }
}

/// What kind of fact an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationKind {
    /// Type of the argument at `index` on frame entry.
    ArgType {
        /// Positional argument index.
        index: u8,
    },
    /// Outcome of a conditional branch.
    Branch {
        /// Whether the branch was taken.
        taken: bool,
    },
    /// Resolved target of an invocation.
    InvokeTarget {
        /// The invoked frame.
        callee: TargetId,
        /// Number of arguments passed.
        arity: u8,
    },
    /// Type of the value returned from the frame.
    ReturnType,
    /// A loop back-edge eligible for on-stack replacement.
    OsrPoint,
}

/// One observed fact at one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntry {
    /// Where the observation was made.
    pub site: SiteId,
    /// What was observed.
    pub kind: ObservationKind,
    /// Shape of the observed value. Meaningless for branch and OSR entries,
    /// which carry their payload in `kind`.
    pub shape: ShapeDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_ordering() {
        let a = SiteId::new(TargetId(1), 4);
        let b = SiteId::new(TargetId(1), 8);
        let c = SiteId::new(TargetId(2), 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_concrete_shape() {
        let shape = ShapeDescriptor::concrete(7);
        assert_eq!(shape.type_id, 7);
        assert!(shape.concrete);
        assert!(!shape.container);
    }
}
