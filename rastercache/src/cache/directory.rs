//! Per-band lookup from block coordinates to resident blocks.
//!
//! Small grids use a dense array indexed by `y * blocks_x + x`; large or
//! sparse grids use a hash map so an untouched band costs nothing. Either
//! way the directory keeps a set of resident coordinates, so walking the
//! resident blocks costs O(resident) rather than O(grid).

use crate::cache::block::Block;
use crate::cache::claim::Claim;
use crate::config::ARRAY_DIRECTORY_MAX_BLOCKS;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Storage strategy for a band's block directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectoryStrategy {
    /// Array for grids under [`ARRAY_DIRECTORY_MAX_BLOCKS`], hash otherwise.
    #[default]
    Auto,
    /// Dense array, one slot per block in the grid. Grids larger than
    /// [`ARRAY_DIRECTORY_MAX_BLOCKS`] fall back to `Hash`.
    Array,
    /// Hash map keyed by block coordinates.
    Hash,
}

impl DirectoryStrategy {
    /// Pick the concrete strategy for a grid of the given size.
    pub fn resolve(self, block_count: u64) -> Self {
        match self {
            Self::Auto if block_count < ARRAY_DIRECTORY_MAX_BLOCKS => Self::Array,
            Self::Auto => Self::Hash,
            Self::Array if block_count > ARRAY_DIRECTORY_MAX_BLOCKS => Self::Hash,
            other => other,
        }
    }
}

impl FromStr for DirectoryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "array" => Ok(Self::Array),
            "hash" | "hashset" => Ok(Self::Hash),
            other => Err(format!(
                "unknown directory strategy '{other}', expected auto, array or hash"
            )),
        }
    }
}

/// What a directory entry holds.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    /// Resident block; the directory owns it.
    Resident(Arc<Block>),
    /// Fill or write-back in progress for this key.
    Claimed(Arc<Claim>),
}

#[derive(Debug)]
enum Storage {
    Array {
        blocks_x: u32,
        slots: Vec<Option<Slot>>,
    },
    Hash(HashMap<(u32, u32), Slot>),
}

/// Block directory for one band.
///
/// Guarded by the band's directory mutex, which is always taken after the
/// cache's global lock.
#[derive(Debug)]
pub struct BlockDirectory {
    storage: Storage,
    resident: HashSet<(u32, u32)>,
    claims: usize,
}

impl BlockDirectory {
    /// Create an empty directory for a `blocks_x` by `blocks_y` grid.
    pub fn new(strategy: DirectoryStrategy, blocks_x: u32, blocks_y: u32) -> Self {
        let block_count = u64::from(blocks_x) * u64::from(blocks_y);
        let resolved = strategy.resolve(block_count);
        let storage = match (resolved, usize::try_from(block_count)) {
            (DirectoryStrategy::Array, Ok(len)) => {
                let mut slots = Vec::new();
                slots.resize_with(len, || None);
                Storage::Array { blocks_x, slots }
            }
            _ => Storage::Hash(HashMap::new()),
        };
        if strategy == DirectoryStrategy::Array && !matches!(storage, Storage::Array { .. }) {
            warn!(
                blocks = block_count,
                limit = ARRAY_DIRECTORY_MAX_BLOCKS,
                "Grid too large for an array directory, using hash"
            );
        }
        Self {
            storage,
            resident: HashSet::new(),
            claims: 0,
        }
    }

    /// Concrete strategy in use.
    pub fn strategy(&self) -> DirectoryStrategy {
        match self.storage {
            Storage::Array { .. } => DirectoryStrategy::Array,
            Storage::Hash(_) => DirectoryStrategy::Hash,
        }
    }

    /// Resident block at `(x, y)`, if any.
    pub fn lookup(&self, x: u32, y: u32) -> Option<Arc<Block>> {
        match self.slot(x, y) {
            Some(Slot::Resident(block)) => Some(Arc::clone(block)),
            _ => None,
        }
    }

    /// Insert a resident block.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` already has an entry. The cache serializes fills
    /// through claims, so a duplicate means the locking discipline broke.
    pub fn insert(&mut self, x: u32, y: u32, block: Arc<Block>) {
        self.put(x, y, Slot::Resident(block));
        self.resident.insert((x, y));
    }

    /// Detach the resident block at `(x, y)`.
    pub fn remove(&mut self, x: u32, y: u32) -> Option<Arc<Block>> {
        if !matches!(self.slot(x, y), Some(Slot::Resident(_))) {
            return None;
        }
        match self.take(x, y) {
            Some(Slot::Resident(block)) => {
                self.resident.remove(&(x, y));
                Some(block)
            }
            _ => None,
        }
    }

    /// Detach every resident block, leaving in-flight claims in place.
    pub fn drain_all(&mut self) -> Vec<Arc<Block>> {
        let keys = std::mem::take(&mut self.resident);
        let mut drained = Vec::with_capacity(keys.len());
        for (x, y) in keys {
            match self.take(x, y) {
                Some(Slot::Resident(block)) => drained.push(block),
                other => panic!("resident index lists ({x}, {y}) but found {other:?}"),
            }
        }
        drained
    }

    /// Coordinates of every resident block, in no particular order.
    pub fn resident_keys(&self) -> Vec<(u32, u32)> {
        self.resident.iter().copied().collect()
    }

    /// Number of resident blocks.
    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    /// Number of fills and write-backs in flight.
    pub fn claim_count(&self) -> usize {
        self.claims
    }

    /// No resident blocks and nothing in flight.
    pub fn is_empty(&self) -> bool {
        self.resident.is_empty() && self.claims == 0
    }

    pub(crate) fn slot(&self, x: u32, y: u32) -> Option<&Slot> {
        match &self.storage {
            Storage::Array { blocks_x, slots } => {
                slots.get(array_index(*blocks_x, x, y))?.as_ref()
            }
            Storage::Hash(map) => map.get(&(x, y)),
        }
    }

    /// Install a fill claim for an absent key.
    pub(crate) fn claim(&mut self, x: u32, y: u32, claim: Arc<Claim>) {
        self.put(x, y, Slot::Claimed(claim));
        self.claims += 1;
    }

    /// Replace a fill claim with the block it produced.
    pub(crate) fn resolve(&mut self, x: u32, y: u32, block: Arc<Block>) {
        self.release_claim(x, y);
        self.insert(x, y, block);
    }

    /// Swap a resident block for a write-back claim and hand the block back.
    pub(crate) fn begin_write_back(&mut self, x: u32, y: u32, claim: Arc<Claim>) -> Arc<Block> {
        let block = self
            .remove(x, y)
            .unwrap_or_else(|| panic!("no resident block at ({x}, {y}) to write back"));
        self.claim(x, y, claim);
        block
    }

    /// Drop the claim at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the key does not hold a claim.
    pub(crate) fn release_claim(&mut self, x: u32, y: u32) {
        match self.take(x, y) {
            Some(Slot::Claimed(_)) => self.claims -= 1,
            other => panic!("expected a claim at ({x}, {y}), found {other:?}"),
        }
    }

    fn put(&mut self, x: u32, y: u32, slot: Slot) {
        let entry = match &mut self.storage {
            Storage::Array { blocks_x, slots } => {
                let index = array_index(*blocks_x, x, y);
                let entry = slots
                    .get_mut(index)
                    .unwrap_or_else(|| panic!("block ({x}, {y}) outside directory grid"));
                entry.replace(slot)
            }
            Storage::Hash(map) => map.insert((x, y), slot),
        };
        assert!(
            entry.is_none(),
            "directory already holds an entry for block ({x}, {y})"
        );
    }

    fn take(&mut self, x: u32, y: u32) -> Option<Slot> {
        match &mut self.storage {
            Storage::Array { blocks_x, slots } => {
                slots.get_mut(array_index(*blocks_x, x, y))?.take()
            }
            Storage::Hash(map) => map.remove(&(x, y)),
        }
    }
}

fn array_index(blocks_x: u32, x: u32, y: u32) -> usize {
    y as usize * blocks_x as usize + x as usize
}
