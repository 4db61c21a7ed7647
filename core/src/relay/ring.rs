//! Ordered index of known relay nodes with successor lookup.
//!
//! Node ids are fixed-width lowercase hex, so lexicographic order equals
//! numeric order and a sorted vector with binary search is enough; the node
//! sets involved are small.

use super::{NodeId, RelayNode};
use std::collections::{HashMap, HashSet};

/// Known relay nodes ordered by id, plus the permanent exclusion set.
#[derive(Default)]
pub struct RelayRing {
    /// Ascending node ids.
    sorted: Vec<NodeId>,
    nodes: HashMap<NodeId, RelayNode>,
    excluded: HashSet<NodeId>,
}

impl RelayRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Known and permanently excluded ids are ignored.
    pub fn insert(&mut self, node: RelayNode) -> bool {
        if self.nodes.contains_key(&node.id) || self.excluded.contains(&node.id) {
            return false;
        }
        let at = self.sorted.partition_point(|id| *id < node.id);
        self.sorted.insert(at, node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        true
    }

    /// Move a node to the permanent exclusion set; it is never reconsidered.
    pub fn exclude(&mut self, id: &str) -> bool {
        if self.nodes.remove(id).is_none() {
            self.excluded.insert(id.to_string());
            return false;
        }
        self.sorted.retain(|known| known != id);
        self.excluded.insert(id.to_string());
        true
    }

    /// Successor search: the node with the smallest id ≥ `target`, wrapping
    /// to the minimum id when none is greater (ring semantics).
    pub fn successor(&self, target: &str) -> Option<&RelayNode> {
        if self.sorted.is_empty() {
            return None;
        }
        let at = self.sorted.partition_point(|id| id.as_str() < target);
        let id = self.sorted.get(at).unwrap_or(&self.sorted[0]);
        self.nodes.get(id)
    }

    /// All known nodes satisfying `predicate`.
    pub fn matching(&self, predicate: impl Fn(&RelayNode) -> bool) -> Vec<RelayNode> {
        self.nodes.values().filter(|n| predicate(n)).cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn is_excluded(&self, id: &str) -> bool {
        self.excluded.contains(id)
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}
