//! Identity-keyed table shared by every cycle-safe traversal.
//!
//! Keys are `(TypeId, NodeId)` pairs when walking instances and DTO ref ids
//! when rebuilding them. Insertions are logged so a speculative branch (a
//! union member that turned out not to match) can be rolled back.
use std::collections::HashMap;
use std::hash::Hash;

use crate::types::TypeId;
use crate::value::NodeId;

/// Key for instance walks: the concrete type and the instance node.
pub type InstanceKey = (TypeId, NodeId);

#[derive(Debug)]
pub struct VisitedNodes<K, R> {
    table: HashMap<K, R>,
    log: Vec<K>,
}

impl<K: Hash + Eq + Clone, R> Default for VisitedNodes<K, R> {
    fn default() -> Self {
        Self { table: HashMap::new(), log: Vec::new() }
    }
}

impl<K: Hash + Eq + Clone, R> VisitedNodes<K, R> {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.table.len() }

    pub fn is_empty(&self) -> bool { self.table.is_empty() }

    pub fn contains(&self, key: &K) -> bool { self.table.contains_key(key) }

    pub fn get(&self, key: &K) -> Option<&R> { self.table.get(key) }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut R> { self.table.get_mut(key) }

    /// Mark `key` visited. Must happen before descending into children.
    pub fn insert(&mut self, key: K, result: R) -> Option<R> {
        let prev = self.table.insert(key.clone(), result);
        if prev.is_none() {
            self.log.push(key);
        }
        prev
    }

    pub fn remove(&mut self, key: &K) -> Option<R> { self.table.remove(key) }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &R)> { self.table.iter() }

    pub fn checkpoint(&self) -> usize { self.log.len() }

    /// Forget every key first inserted after `checkpoint`.
    pub fn rollback(&mut self, checkpoint: usize) {
        for key in self.log.drain(checkpoint..) {
            self.table.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_forgets_only_later_keys() {
        let mut v: VisitedNodes<u64, &str> = VisitedNodes::new();
        v.insert(1, "a");
        let cp = v.checkpoint();
        v.insert(2, "b");
        v.insert(3, "c");
        v.rollback(cp);
        assert!(v.contains(&1));
        assert!(!v.contains(&2));
        assert!(!v.contains(&3));
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn reinsert_keeps_single_log_entry() {
        let mut v: VisitedNodes<u64, u8> = VisitedNodes::new();
        v.insert(7, 0);
        v.insert(7, 1);
        assert_eq!(v.get(&7), Some(&1));
        v.rollback(0);
        assert!(v.is_empty());
    }
}
