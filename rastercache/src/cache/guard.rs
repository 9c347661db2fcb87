//! Scoped access to a locked block.

use crate::cache::block::Block;
use crate::cache::manager::BlockCache;
use crate::cache::types::{AccessMode, BlockKey};
use crate::raster::RasterBand;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock};
use std::fmt;
use std::sync::Arc;

enum Access {
    Read(ArcRwLockReadGuard<RawRwLock, Vec<u8>>),
    Write(ArcRwLockWriteGuard<RawRwLock, Vec<u8>>),
}

/// A pinned, locked block.
///
/// While a guard exists its block cannot be evicted. Dropping the guard (or
/// calling [`release`](Self::release)) unpins the block and, when it was the
/// last guard, lets the cache reclaim memory if it is over budget. Release
/// runs on every exit path, including unwinding.
///
/// Read guards share the buffer; a write guard is exclusive.
///
/// # Deadlocks
///
/// Requesting a write guard on a block this thread already holds, or
/// flushing a band while holding one of its guards, waits forever.
pub struct BlockGuard {
    cache: BlockCache,
    band: Arc<RasterBand>,
    block: Arc<Block>,
    access: Option<Access>,
}

impl BlockGuard {
    /// Take the buffer lock on an already pinned block.
    ///
    /// Called with no cache lock held; may block behind a writer.
    pub(crate) fn lock(
        cache: BlockCache,
        band: Arc<RasterBand>,
        block: Arc<Block>,
        mode: AccessMode,
    ) -> Self {
        let access = match mode {
            AccessMode::Read => Access::Read(block.lock_shared()),
            AccessMode::Write => Access::Write(block.lock_exclusive()),
        };
        Self {
            cache,
            band,
            block,
            access: Some(access),
        }
    }

    /// Key of the locked block.
    pub fn key(&self) -> BlockKey {
        self.block.key()
    }

    /// Mode this guard was acquired with.
    pub fn mode(&self) -> AccessMode {
        match self.access {
            Some(Access::Write(_)) => AccessMode::Write,
            _ => AccessMode::Read,
        }
    }

    /// Block pixels.
    pub fn data(&self) -> &[u8] {
        match &self.access {
            Some(Access::Read(guard)) => guard.as_slice(),
            Some(Access::Write(guard)) => guard.as_slice(),
            None => unreachable!("guard accessed after release"),
        }
    }

    /// Mutable block pixels. Call [`mark_dirty`](Self::mark_dirty) after
    /// modifying them or the change is dropped on eviction.
    ///
    /// # Panics
    ///
    /// Panics on a read guard.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let key = self.block.key();
        match &mut self.access {
            Some(Access::Write(guard)) => guard.as_mut_slice(),
            _ => panic!("block {key} is not locked for writing"),
        }
    }

    /// Record that the buffer was modified so eviction writes it back.
    ///
    /// # Panics
    ///
    /// Panics on a read guard.
    pub fn mark_dirty(&self) {
        assert!(
            self.mode() == AccessMode::Write,
            "mark_dirty on block {} requires a write guard",
            self.block.key()
        );
        self.block.mark_dirty();
    }

    /// Whether the block has unwritten changes.
    pub fn is_dirty(&self) -> bool {
        self.block.is_dirty()
    }

    /// Drop the block from the cache once the last guard on it is released,
    /// writing it back first if dirty.
    pub fn discard(&self) {
        self.block.request_removal();
    }

    /// Release the guard now. Equivalent to dropping it.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        if let Some(access) = self.access.take() {
            drop(access);
            self.cache.release(&self.band, &self.block);
        }
    }
}

impl fmt::Debug for BlockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockGuard")
            .field("key", &self.block.key())
            .field("mode", &self.mode())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
