//! Process-wide LRU ordering of resident blocks.
//!
//! The list holds weak references only; ownership stays with the band
//! directories. Every resident block appears here exactly once, and a block
//! leaves this list in the same critical section that detaches it from its
//! directory.
//!
//! # Complexity
//!
//! - `insert`, `touch`, `remove`: O(1) (hash lookup plus list splice)
//! - `oldest_unlocked`: O(k) where k is the number of pinned blocks passed
//!   over from the LRU end

use crate::cache::block::Block;
use crate::cache::types::{BlockKey, DatasetId};
use lru::LruCache;
use std::sync::{Arc, Weak};

#[derive(Debug)]
struct ListEntry {
    block: Weak<Block>,
    size_bytes: usize,
}

/// Recency-ordered list of every resident block.
///
/// Not synchronized on its own; lives inside the cache's global lock.
pub struct EvictionList {
    entries: LruCache<BlockKey, ListEntry>,
}

impl EvictionList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
        }
    }

    /// Add a newly resident block at the most-recently-used end.
    ///
    /// # Panics
    ///
    /// Panics if the block is already listed.
    pub fn insert(&mut self, block: &Arc<Block>) {
        let entry = ListEntry {
            block: Arc::downgrade(block),
            size_bytes: block.size(),
        };
        let previous = self.entries.push(block.key(), entry);
        assert!(
            previous.is_none(),
            "block {} inserted into the eviction list twice",
            block.key()
        );
    }

    /// Move a block to the most-recently-used end.
    pub fn touch(&mut self, key: &BlockKey) {
        self.entries.promote(key);
    }

    /// Detach a block, returning the bytes it accounted for.
    pub fn remove(&mut self, key: &BlockKey) -> Option<usize> {
        self.entries.pop(key).map(|entry| entry.size_bytes)
    }

    /// Least-recently-used block that nobody holds a guard on.
    pub fn oldest_unlocked(&self) -> Option<Arc<Block>> {
        self.candidates().next()
    }

    /// Unpinned blocks, least-recently-used first.
    pub fn candidates(&self) -> impl Iterator<Item = Arc<Block>> + '_ {
        self.entries
            .iter()
            .rev()
            .filter_map(|(_, entry)| entry.block.upgrade())
            .filter(|block| block.is_evictable())
    }

    /// Keys in eviction order, least-recently-used first.
    pub fn keys(&self) -> Vec<BlockKey> {
        self.entries.iter().rev().map(|(key, _)| *key).collect()
    }

    /// Whether the block is listed.
    pub fn contains(&self, key: &BlockKey) -> bool {
        self.entries.contains(key)
    }

    /// Number of listed blocks that belong to `dataset`.
    pub fn count_for_dataset(&self, dataset: DatasetId) -> usize {
        self.entries
            .iter()
            .filter(|(key, _)| key.dataset == dataset)
            .count()
    }

    /// Number of listed blocks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EvictionList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::BandId;

    fn block(x: u32) -> Arc<Block> {
        Arc::new(Block::new(
            BlockKey::new(DatasetId(1), BandId(1), x, 0),
            vec![0; 100],
            Weak::new(),
        ))
    }

    #[test]
    fn test_oldest_is_first_inserted() {
        let mut list = EvictionList::new();
        let blocks: Vec<_> = (0..3).map(block).collect();
        for b in &blocks {
            list.insert(b);
        }
        assert_eq!(list.len(), 3);
        assert_eq!(list.oldest_unlocked().unwrap().key().x, 0);
    }

    #[test]
    fn test_touch_moves_to_most_recent() {
        let mut list = EvictionList::new();
        let blocks: Vec<_> = (0..3).map(block).collect();
        for b in &blocks {
            list.insert(b);
        }
        list.touch(&blocks[0].key());

        let order: Vec<u32> = list.keys().iter().map(|k| k.x).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(list.oldest_unlocked().unwrap().key().x, 1);
    }

    #[test]
    fn test_oldest_unlocked_skips_pinned() {
        let mut list = EvictionList::new();
        let blocks: Vec<_> = (0..3).map(block).collect();
        for b in &blocks {
            list.insert(b);
        }
        blocks[0].pin(1);
        blocks[1].pin(2);
        assert_eq!(list.oldest_unlocked().unwrap().key().x, 2);

        blocks[2].pin(1);
        assert!(list.oldest_unlocked().is_none());
    }

    #[test]
    fn test_remove_returns_size() {
        let mut list = EvictionList::new();
        let b = block(5);
        list.insert(&b);
        assert!(list.contains(&b.key()));
        assert_eq!(list.remove(&b.key()), Some(100));
        assert_eq!(list.remove(&b.key()), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_dropped_blocks_are_not_candidates() {
        let mut list = EvictionList::new();
        let live = block(0);
        list.insert(&live);
        {
            let gone = block(1);
            list.insert(&gone);
        }
        let candidates: Vec<_> = list.candidates().map(|b| b.key().x).collect();
        assert_eq!(candidates, vec![0]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    #[should_panic(expected = "twice")]
    fn test_double_insert_panics() {
        let mut list = EvictionList::new();
        let b = block(0);
        list.insert(&b);
        list.insert(&b);
    }

    #[test]
    fn test_count_for_dataset() {
        let mut list = EvictionList::new();
        let mine = block(0);
        let other = Arc::new(Block::new(
            BlockKey::new(DatasetId(2), BandId(9), 0, 0),
            vec![0; 10],
            Weak::new(),
        ));
        list.insert(&mine);
        list.insert(&other);
        assert_eq!(list.count_for_dataset(DatasetId(1)), 1);
        assert_eq!(list.count_for_dataset(DatasetId(2)), 1);
        assert_eq!(list.count_for_dataset(DatasetId(3)), 0);
    }
}
