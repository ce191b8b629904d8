//! String interning for task ids.
//!
//! The graph is an arena: every task id maps to a dense `NodeId` that indexes
//! the node vector directly.

use rustc_hash::FxHashMap;

/// Arena index of a task node (u32 for compact edge lists).
pub type NodeId = u32;

/// Bidirectional map between task id strings and arena indices.
#[derive(Debug, Clone)]
pub struct TaskIdInterner {
    to_int: FxHashMap<String, NodeId>,
    from_int: Vec<String>,
}

impl TaskIdInterner {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            to_int: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            from_int: Vec::with_capacity(capacity),
        }
    }

    /// Intern a task id. Returns `(id, true)` when the id was new.
    pub fn intern(&mut self, s: &str) -> (NodeId, bool) {
        if let Some(&id) = self.to_int.get(s) {
            return (id, false);
        }
        let id = self.from_int.len() as NodeId;
        self.from_int.push(s.to_string());
        self.to_int.insert(s.to_string(), id);
        (id, true)
    }

    #[inline]
    pub fn get(&self, s: &str) -> Option<NodeId> {
        self.to_int.get(s).copied()
    }

    #[inline]
    pub fn resolve(&self, id: NodeId) -> Option<&str> {
        self.from_int.get(id as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.from_int.len()
    }

    pub fn is_empty(&self) -> bool {
        self.from_int.is_empty()
    }
}

impl Default for TaskIdInterner {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_resolve() {
        let mut interner = TaskIdInterner::with_capacity(4);

        let (a, fresh_a) = interner.intern("survey");
        let (b, _) = interner.intern("valuation");
        let (a_again, fresh_again) = interner.intern("survey");

        assert!(fresh_a);
        assert!(!fresh_again);
        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_eq!(interner.resolve(b), Some("valuation"));
        assert_eq!(interner.get("missing"), None);
        assert_eq!(interner.len(), 2);
    }
}
