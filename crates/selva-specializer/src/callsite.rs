//! Interned callsite descriptors.
//!
//! A callsite summarizes the argument shapes of an invocation. The intern
//! table deduplicates them process-wide so specialization graphs can hold a
//! small id instead of copying shape vectors. Entries live for the process
//! lifetime, except that non-common entries are released at shutdown.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::defaults::INTERN_ARITY_LIMIT;
use crate::log::entry::ShapeDescriptor;

/// Handle to an interned callsite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallsiteId(pub u32);

/// Argument-shape descriptor for one invocation site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Callsite {
    /// Shape of each positional argument, in order.
    pub shapes: Vec<ShapeDescriptor>,
}

impl Callsite {
    /// Callsite with the given argument shapes.
    pub fn new(shapes: Vec<ShapeDescriptor>) -> Self {
        Callsite { shapes }
    }

    /// Number of arguments.
    pub fn arity(&self) -> usize {
        self.shapes.len()
    }
}

struct InternedEntry {
    id: CallsiteId,
    callsite: Arc<Callsite>,
    common: bool,
}

#[derive(Default)]
struct Inner {
    /// Buckets indexed by arity, `0..=INTERN_ARITY_LIMIT`.
    by_arity: Vec<Vec<InternedEntry>>,
    by_id: FxHashMap<u32, Arc<Callsite>>,
    next_id: u32,
}

/// Process-wide deduplicating registry of callsites, bucketed by arity.
pub struct CallsiteInternTable {
    inner: RwLock<Inner>,
}

impl CallsiteInternTable {
    /// Create an empty table.
    pub fn new() -> Self {
        let inner = Inner {
            by_arity: (0..=INTERN_ARITY_LIMIT).map(|_| Vec::new()).collect(),
            by_id: FxHashMap::default(),
            next_id: 0,
        };
        CallsiteInternTable {
            inner: RwLock::new(inner),
        }
    }

    /// Create a table pre-seeded with the callsites used all over the
    /// runtime, so graphs referencing them never miss the intern cache.
    pub fn with_common() -> Self {
        let table = Self::new();
        table.intern_common(Callsite::new(vec![]));
        table.intern_common(Callsite::new(vec![ShapeDescriptor::default()]));
        table.intern_common(Callsite::new(vec![
            ShapeDescriptor::default(),
            ShapeDescriptor::default(),
        ]));
        table
    }

    /// Intern `callsite`, returning the id of the canonical entry. Returns
    /// `None` when the arity exceeds the intern limit; such callsites are
    /// not deduplicated.
    pub fn intern(&self, callsite: Callsite) -> Option<CallsiteId> {
        self.intern_entry(callsite, false)
    }

    fn intern_common(&self, callsite: Callsite) -> Option<CallsiteId> {
        self.intern_entry(callsite, true)
    }

    fn intern_entry(&self, callsite: Callsite, common: bool) -> Option<CallsiteId> {
        let arity = callsite.arity();
        if arity > INTERN_ARITY_LIMIT {
            return None;
        }
        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_arity[arity].iter().find(|e| *e.callsite == callsite) {
            return Some(existing.id);
        }
        let id = CallsiteId(inner.next_id);
        inner.next_id += 1;
        let shared = Arc::new(callsite);
        inner.by_id.insert(id.0, shared.clone());
        inner.by_arity[arity].push(InternedEntry {
            id,
            callsite: shared,
            common,
        });
        Some(id)
    }

    /// Look up an interned callsite by id.
    pub fn get(&self, id: CallsiteId) -> Option<Arc<Callsite>> {
        self.inner.read().by_id.get(&id.0).cloned()
    }

    /// Whether `id` refers to one of the pre-seeded common callsites.
    pub fn is_common(&self, id: CallsiteId) -> bool {
        let inner = self.inner.read();
        inner
            .by_arity
            .iter()
            .flatten()
            .any(|e| e.id == id && e.common)
    }

    /// Number of interned callsites.
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Whether the table holds no callsites.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every non-common entry. Called once at shutdown; common
    /// callsites persist for the process lifetime. Returns the number of
    /// entries released.
    pub fn clear_uncommon(&self) -> usize {
        let mut inner = self.inner.write();
        let mut removed = 0;
        for bucket in inner.by_arity.iter_mut() {
            let before = bucket.len();
            bucket.retain(|e| e.common);
            removed += before - bucket.len();
        }
        let keep: Vec<u32> = inner
            .by_arity
            .iter()
            .flatten()
            .map(|e| e.id.0)
            .collect();
        inner.by_id.retain(|id, _| keep.contains(id));
        removed
    }
}

impl Default for CallsiteInternTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shapes(type_ids: &[u32]) -> Vec<ShapeDescriptor> {
        type_ids.iter().map(|&t| ShapeDescriptor::concrete(t)).collect()
    }

    #[test]
    fn test_intern_deduplicates() {
        let table = CallsiteInternTable::new();
        let a = table.intern(Callsite::new(shapes(&[1, 2]))).unwrap();
        let b = table.intern(Callsite::new(shapes(&[1, 2]))).unwrap();
        let c = table.intern(Callsite::new(shapes(&[1, 3]))).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_arity_limit() {
        let table = CallsiteInternTable::new();
        let over = Callsite::new(vec![ShapeDescriptor::concrete(1); INTERN_ARITY_LIMIT + 1]);
        assert!(table.intern(over).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_lookup_by_id() {
        let table = CallsiteInternTable::new();
        let id = table.intern(Callsite::new(shapes(&[4]))).unwrap();
        let callsite = table.get(id).unwrap();
        assert_eq!(callsite.arity(), 1);
        assert_eq!(callsite.shapes[0].type_id, 4);
    }

    #[test]
    fn test_clear_uncommon_keeps_common() {
        let table = CallsiteInternTable::with_common();
        let seeded = table.len();
        let id = table.intern(Callsite::new(shapes(&[9, 9, 9]))).unwrap();
        assert!(!table.is_common(id));

        let removed = table.clear_uncommon();
        assert_eq!(removed, 1);
        assert_eq!(table.len(), seeded);
        assert!(table.get(id).is_none());
    }

    #[test]
    fn test_common_seed_is_interned() {
        let table = CallsiteInternTable::with_common();
        let id = table.intern(Callsite::new(vec![])).unwrap();
        assert!(table.is_common(id));
    }
}
