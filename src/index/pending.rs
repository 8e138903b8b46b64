//! Per-session buffer of index entries waiting to be flushed.

use std::collections::BTreeMap;

use crate::dom::NodeId;

/// Key to node ids, accumulated during one indexing pass over one document.
///
/// Node ids under a key keep their insertion order, duplicates included.
#[derive(Debug)]
pub struct PendingIndex<K: Ord> {
    entries: BTreeMap<K, Vec<NodeId>>,
    node_count: usize,
}

impl<K: Ord> Default for PendingIndex<K> {
    fn default() -> Self {
        PendingIndex {
            entries: BTreeMap::new(),
            node_count: 0,
        }
    }
}

impl<K: Ord> PendingIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: K, node: NodeId) {
        self.entries.entry(key).or_default().push(node);
        self.node_count += 1;
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of node ids over all keys.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn get(&self, key: &K) -> Option<&[NodeId]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Take every entry in key order, leaving the buffer empty.
    pub fn drain(&mut self) -> impl Iterator<Item = (K, Vec<NodeId>)> + use<K> {
        self.node_count = 0;
        std::mem::take(&mut self.entries).into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_keeps_duplicates_in_order() {
        let mut pending = PendingIndex::new();
        pending.add("k", NodeId::new(1, 9));
        pending.add("k", NodeId::new(1, 3));
        pending.add("k", NodeId::new(1, 9));
        pending.add("j", NodeId::new(1, 4));

        assert_eq!(pending.len(), 2);
        assert_eq!(pending.node_count(), 4);
        assert_eq!(
            pending.get(&"k").unwrap(),
            &[NodeId::new(1, 9), NodeId::new(1, 3), NodeId::new(1, 9)]
        );
    }

    #[test]
    fn test_drain_is_key_ordered_and_empties() {
        let mut pending = PendingIndex::new();
        pending.add(3, NodeId::new(1, 1));
        pending.add(1, NodeId::new(1, 2));
        pending.add(2, NodeId::new(1, 3));

        let keys: Vec<i32> = pending.drain().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![1, 2, 3]);
        assert!(pending.is_empty());
        assert_eq!(pending.node_count(), 0);
    }
}
