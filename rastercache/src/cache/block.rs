//! A single cached tile of raster data.

use crate::cache::types::BlockKey;
use crate::raster::RasterBand;
use parking_lot::{
    ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock, RwLockReadGuard,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// One tile's worth of pixels for one band, plus cache bookkeeping.
///
/// The pixel buffer sits behind a reader/writer lock that guards hand out.
/// `lock_count` counts outstanding guards (including ones still waiting for
/// the buffer lock) and is only changed while the cache's global lock is held.
pub struct Block {
    key: BlockKey,
    data: Arc<RwLock<Vec<u8>>>,
    size: usize,
    dirty: AtomicBool,
    lock_count: AtomicUsize,
    remove_on_release: AtomicBool,
    band: Weak<RasterBand>,
}

impl Block {
    /// Wrap a freshly filled buffer.
    pub(crate) fn new(key: BlockKey, buffer: Vec<u8>, band: Weak<RasterBand>) -> Self {
        Self {
            key,
            size: buffer.len(),
            data: Arc::new(RwLock::new(buffer)),
            dirty: AtomicBool::new(false),
            lock_count: AtomicUsize::new(0),
            remove_on_release: AtomicBool::new(false),
            band,
        }
    }

    /// Key identifying this block.
    pub fn key(&self) -> BlockKey {
        self.key
    }

    /// Size of the pixel buffer in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the buffer changed since it was filled.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Number of outstanding guards.
    pub fn lock_count(&self) -> usize {
        self.lock_count.load(Ordering::Acquire)
    }

    /// A block can be evicted only while nobody holds or awaits a guard on it.
    pub fn is_evictable(&self) -> bool {
        self.lock_count() == 0
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Add `count` pins. Caller holds the global lock.
    pub(crate) fn pin(&self, count: usize) {
        self.lock_count.fetch_add(count, Ordering::AcqRel);
    }

    /// Remove one pin and return the remaining count. Caller holds the global lock.
    ///
    /// # Panics
    ///
    /// Panics if the block is not pinned, which means a guard was released twice.
    pub(crate) fn unpin(&self) -> usize {
        match self
            .lock_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => panic!(
                "block {} released more times than it was locked",
                self.key
            ),
        }
    }

    /// Ask for the block to be dropped from the cache when its last guard goes.
    pub(crate) fn request_removal(&self) {
        self.remove_on_release.store(true, Ordering::Release);
    }

    pub(crate) fn removal_requested(&self) -> bool {
        self.remove_on_release.load(Ordering::Acquire)
    }

    /// Owning band, unless it is being torn down.
    pub(crate) fn band(&self) -> Option<Arc<RasterBand>> {
        self.band.upgrade()
    }

    /// Borrow the buffer for write-back. Only used on detached blocks.
    pub(crate) fn read_data(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read()
    }

    pub(crate) fn lock_shared(&self) -> ArcRwLockReadGuard<RawRwLock, Vec<u8>> {
        self.data.read_arc()
    }

    pub(crate) fn lock_exclusive(&self) -> ArcRwLockWriteGuard<RawRwLock, Vec<u8>> {
        self.data.write_arc()
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("key", &self.key)
            .field("size", &self.size)
            .field("dirty", &self.is_dirty())
            .field("lock_count", &self.lock_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::{BandId, DatasetId};

    fn create_test_block() -> Block {
        Block::new(
            BlockKey::new(DatasetId(1), BandId(1), 2, 3),
            vec![7; 64],
            Weak::new(),
        )
    }

    #[test]
    fn test_new_block_is_clean_and_unlocked() {
        let block = create_test_block();
        assert_eq!(block.size(), 64);
        assert!(!block.is_dirty());
        assert_eq!(block.lock_count(), 0);
        assert!(block.is_evictable());
        assert!(!block.removal_requested());
    }

    #[test]
    fn test_pin_and_unpin() {
        let block = create_test_block();
        block.pin(3);
        assert!(!block.is_evictable());
        assert_eq!(block.unpin(), 2);
        assert_eq!(block.unpin(), 1);
        assert_eq!(block.unpin(), 0);
        assert!(block.is_evictable());
    }

    #[test]
    #[should_panic(expected = "released more times than it was locked")]
    fn test_double_release_panics() {
        let block = create_test_block();
        block.pin(1);
        block.unpin();
        block.unpin();
    }

    #[test]
    fn test_mark_dirty() {
        let block = create_test_block();
        block.mark_dirty();
        assert!(block.is_dirty());
    }

    #[test]
    fn test_readers_share_buffer() {
        let block = create_test_block();
        let first = block.lock_shared();
        let second = block.lock_shared();
        assert_eq!(first[0], 7);
        assert_eq!(second[63], 7);
    }

    #[test]
    fn test_writer_changes_are_visible() {
        let block = create_test_block();
        {
            let mut writer = block.lock_exclusive();
            writer[0] = 42;
        }
        assert_eq!(block.read_data()[0], 42);
    }

    #[test]
    fn test_orphaned_block_has_no_band() {
        let block = create_test_block();
        assert!(block.band().is_none());
    }
}
