//! The block cache manager.
//!
//! # Locking
//!
//! ```text
//! global state lock ──► band directory lock ──► claim lock
//! ```
//!
//! Locks are always taken in that order. A block's buffer lock is only taken
//! with none of them held, and no lock is ever held across a driver call.
//! The global lock covers the eviction list, the resident byte count, the
//! open dataset set and every change to a block's pin count.
//!
//! # Block lifecycle
//!
//! ```text
//! Absent ──► Filling ──► Resident(clean) ⇄ Resident(dirty) ──► Evicting ──► Absent
//! ```
//!
//! `Filling` and the dirty half of `Evicting` are represented by a claim in
//! the band's directory; requesters of that key wait on the claim.

use crate::cache::block::Block;
use crate::cache::claim::{Claim, ClaimKind, ClaimOutcome};
use crate::cache::directory::{BlockDirectory, DirectoryStrategy, Slot};
use crate::cache::eviction::EvictionList;
use crate::cache::guard::BlockGuard;
use crate::cache::hooks::{CacheHooks, DelayHooks, HookPoint, NoOpHooks};
use crate::cache::stats::{CacheCounters, CacheStats};
use crate::cache::types::{AccessMode, BlockKey, CacheError, DatasetId, WriteBackError};
use crate::config::{format_size, CacheConfig};
use crate::driver::DriverError;
use crate::raster::{BandInfo, Dataset, RasterBand};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State behind the global lock.
struct CacheState {
    lru: EvictionList,
    resident_bytes: usize,
    budget_bytes: usize,
    open_datasets: HashSet<DatasetId>,
}

struct CacheInner {
    state: Mutex<CacheState>,
    /// Signalled whenever a pin count drops to zero or a claim settles.
    changed: Condvar,
    hooks: Arc<dyn CacheHooks>,
    counters: CacheCounters,
    write_back_errors: Mutex<Vec<WriteBackError>>,
    next_id: AtomicU64,
    directory_strategy: DirectoryStrategy,
}

/// A block detached from the list and its directory, not yet freed.
struct Detached {
    band: Arc<RasterBand>,
    block: Arc<Block>,
    /// Present when the block is dirty and its key is held for write-back.
    claim: Option<Arc<Claim>>,
}

/// Tile cache shared by every dataset opened against it.
///
/// Cloning is cheap and yields a handle to the same cache, with one memory
/// budget shared by all clones.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use rastercache::cache::{AccessMode, BlockCache};
/// use rastercache::config::CacheConfig;
/// use rastercache::driver::MemoryDriver;
/// use rastercache::raster::{BandGeometry, DataType, Dataset};
///
/// let cache = BlockCache::new(CacheConfig::default().with_budget_bytes(1 << 20));
/// let geometry = BandGeometry::new(512, 512, 256, 256, DataType::Byte);
/// let dataset = Dataset::open(&cache, Arc::new(MemoryDriver::new()), geometry, 1).unwrap();
///
/// let band = dataset.band(0).unwrap();
/// let mut guard = cache.get_locked_block(band, 1, 0, AccessMode::Write).unwrap();
/// guard.data_mut()[0] = 255;
/// guard.mark_dirty();
/// drop(guard);
///
/// assert_eq!(cache.current_resident_bytes(), 256 * 256);
/// dataset.close().unwrap();
/// assert_eq!(cache.current_resident_bytes(), 0);
/// ```
#[derive(Clone)]
pub struct BlockCache {
    inner: Arc<CacheInner>,
}

impl BlockCache {
    /// Create a cache from configuration.
    ///
    /// Debug delays in `config.debug` install [`DelayHooks`]; otherwise no
    /// instrumentation runs.
    pub fn new(config: CacheConfig) -> Self {
        let hooks: Arc<dyn CacheHooks> = if config.debug.is_enabled() {
            Arc::new(DelayHooks::from_config(&config.debug))
        } else {
            Arc::new(NoOpHooks)
        };
        Self::with_hooks(config, hooks)
    }

    /// Create a cache with explicit instrumentation hooks.
    pub fn with_hooks(config: CacheConfig, hooks: Arc<dyn CacheHooks>) -> Self {
        debug!(
            budget = %format_size(config.budget_bytes),
            directory = ?config.directory_strategy,
            "Creating block cache"
        );
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    lru: EvictionList::new(),
                    resident_bytes: 0,
                    budget_bytes: config.budget_bytes,
                    open_datasets: HashSet::new(),
                }),
                changed: Condvar::new(),
                hooks,
                counters: CacheCounters::new(),
                write_back_errors: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                directory_strategy: config.directory_strategy,
            }),
        }
    }

    /// Configured memory ceiling in bytes.
    pub fn budget_bytes(&self) -> usize {
        self.inner.state.lock().budget_bytes
    }

    /// Change the memory ceiling, evicting right away if it was lowered.
    pub fn set_budget_bytes(&self, budget_bytes: usize) {
        let previous = {
            let mut state = self.inner.state.lock();
            std::mem::replace(&mut state.budget_bytes, budget_bytes)
        };
        info!(
            from = %format_size(previous),
            to = %format_size(budget_bytes),
            "Block cache budget changed"
        );
        self.reclaim();
    }

    /// Bytes held by resident blocks across every dataset.
    pub fn current_resident_bytes(&self) -> usize {
        self.inner.state.lock().resident_bytes
    }

    /// Number of resident blocks across every dataset.
    pub fn resident_block_count(&self) -> usize {
        self.inner.state.lock().lru.len()
    }

    /// Resident blocks in eviction order, least-recently-used first.
    pub fn resident_keys(&self) -> Vec<BlockKey> {
        self.inner.state.lock().lru.keys()
    }

    /// Whether the block is resident.
    pub fn is_resident(&self, key: &BlockKey) -> bool {
        self.inner.state.lock().lru.contains(key)
    }

    /// Number of datasets opened against this cache and not yet closed.
    pub fn open_dataset_count(&self) -> usize {
        self.inner.state.lock().open_datasets.len()
    }

    /// Snapshot of hit, fill and eviction counters.
    pub fn stats(&self) -> CacheStats {
        let (resident_bytes, resident_blocks, budget_bytes) = {
            let state = self.inner.state.lock();
            (state.resident_bytes, state.lru.len(), state.budget_bytes)
        };
        self.inner
            .counters
            .snapshot(resident_bytes, resident_blocks, budget_bytes)
    }

    /// Take every write-back failure reported since the last call.
    ///
    /// Eviction reclaims memory even when the driver rejects a write; this is
    /// where those failures surface.
    pub fn take_write_back_errors(&self) -> Vec<WriteBackError> {
        std::mem::take(&mut *self.inner.write_back_errors.lock())
    }

    /// Lock block `(x, y)` of `band`, filling it from the driver on a miss.
    ///
    /// Concurrent requests for the same absent block share one driver read;
    /// all of them see its result. Filling may evict other unlocked blocks to
    /// stay within budget.
    ///
    /// # Errors
    ///
    /// - [`CacheError::OutOfBounds`] if `(x, y)` is outside the band's grid
    /// - [`CacheError::FillFailed`] if the driver read failed; nothing is cached
    pub fn get_locked_block(
        &self,
        band: &Arc<RasterBand>,
        x: u32,
        y: u32,
        mode: AccessMode,
    ) -> Result<BlockGuard, CacheError> {
        band.geometry().check_block(x, y)?;
        let key = band.block_key(x, y);

        loop {
            let mut state = self.inner.state.lock();
            let mut directory = band.directory.lock();

            match directory.slot(x, y).cloned() {
                Some(Slot::Resident(block)) => {
                    block.pin(1);
                    state.lru.touch(&key);
                    drop(directory);
                    drop(state);
                    self.inner.counters.record_hit();
                    return Ok(self.guard(band, block, mode));
                }
                Some(Slot::Claimed(claim)) => {
                    if claim.kind() == ClaimKind::Fill {
                        claim.register_waiter();
                    }
                    drop(directory);
                    drop(state);
                    debug!(block = %key, kind = ?claim.kind(), "Waiting on in-flight claim");

                    match claim.wait() {
                        ClaimOutcome::Filled(block) => {
                            self.inner.counters.record_coalesced();
                            return Ok(self.guard(band, block, mode));
                        }
                        ClaimOutcome::Failed(source) => {
                            return Err(CacheError::FillFailed { key, source });
                        }
                        ClaimOutcome::Vacated => continue,
                    }
                }
                None => {
                    let claim = Claim::fill(key);
                    directory.claim(x, y, Arc::clone(&claim));
                    drop(directory);
                    drop(state);
                    self.inner.counters.record_miss();

                    let block = self.fill(band, &claim)?;
                    self.reclaim();
                    return Ok(self.guard(band, block, mode));
                }
            }
        }
    }

    /// Evict the least-recently-used unlocked block, writing it back if dirty.
    ///
    /// Returns `false` when every resident block is locked (or none is
    /// resident). A failed write-back still frees the block and is reported
    /// through [`take_write_back_errors`](Self::take_write_back_errors).
    pub fn flush_one_block(&self) -> bool {
        self.evict_one()
    }

    /// Write back and drop every block of `band`, in no particular order.
    ///
    /// Waits for guards on the band's blocks to be released and for in-flight
    /// fills to land; it never revokes a lock. Returns the number of blocks
    /// flushed.
    ///
    /// # Errors
    ///
    /// [`CacheError::WriteBackFailed`] if any write-back failed. The band's
    /// blocks are gone from the cache regardless.
    pub fn flush_band(&self, band: &Arc<RasterBand>) -> Result<usize, CacheError> {
        let (flushed, failures) = self.drain_band(band);
        match CacheError::from_write_backs(failures) {
            Some(err) => Err(err),
            None => Ok(flushed),
        }
    }

    /// Flush every band of `dataset`.
    ///
    /// # Panics
    ///
    /// Panics if a block of the dataset is still resident afterwards, which
    /// happens only if other threads keep using the dataset while it closes.
    pub fn flush_all_for_dataset(&self, dataset: &Dataset) -> Result<usize, CacheError> {
        let mut flushed = 0;
        let mut failures = Vec::new();
        for band in dataset.bands() {
            let (count, mut failed) = self.drain_band(band);
            flushed += count;
            failures.append(&mut failed);
        }

        let remaining = self.inner.state.lock().lru.count_for_dataset(dataset.id());
        assert_eq!(
            remaining,
            0,
            "dataset {} still has resident blocks after flush",
            dataset.id()
        );

        debug!(dataset = %dataset.id(), flushed, failed = failures.len(), "Flushed dataset");
        match CacheError::from_write_backs(failures) {
            Some(err) => Err(err),
            None => Ok(flushed),
        }
    }

    /// Evict every unlocked block, least-recently-used first.
    pub fn flush_all(&self) -> Result<usize, CacheError> {
        let mut flushed = 0;
        let mut failures = Vec::new();
        while let Some(failure) = self.evict_next(false) {
            flushed += 1;
            failures.extend(failure);
        }
        match CacheError::from_write_backs(failures) {
            Some(err) => Err(err),
            None => Ok(flushed),
        }
    }

    /// Tear the cache down: flush every block and, when no dataset is still
    /// open, check that nothing stayed resident.
    ///
    /// # Panics
    ///
    /// Panics if no dataset is open but resident bytes remain, meaning a
    /// guard outlived its dataset.
    pub fn shutdown(self) -> Result<usize, CacheError> {
        let result = self.flush_all();
        let state = self.inner.state.lock();
        info!(
            resident = %format_size(state.resident_bytes),
            open_datasets = state.open_datasets.len(),
            "Block cache shut down"
        );
        if state.open_datasets.is_empty() {
            assert_eq!(
                state.resident_bytes, 0,
                "block cache torn down with resident blocks and no open dataset"
            );
        }
        result
    }

    pub(crate) fn allocate_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn directory_strategy(&self) -> DirectoryStrategy {
        self.inner.directory_strategy
    }

    pub(crate) fn register_dataset(&self, dataset: DatasetId) {
        self.inner.state.lock().open_datasets.insert(dataset);
    }

    pub(crate) fn unregister_dataset(&self, dataset: DatasetId) {
        self.inner.state.lock().open_datasets.remove(&dataset);
    }

    /// Unpin a block on behalf of a dropped guard.
    pub(crate) fn release(&self, band: &Arc<RasterBand>, block: &Arc<Block>) {
        let mut state = self.inner.state.lock();
        if block.unpin() > 0 {
            return;
        }
        self.inner.changed.notify_all();

        if block.removal_requested() {
            let detached = {
                let mut directory = band.directory.lock();
                self.detach(&mut state, &mut directory, band, Arc::clone(block))
            };
            drop(state);
            self.complete_detach(detached);
            self.reclaim();
            return;
        }

        let over_budget = state.resident_bytes > state.budget_bytes;
        drop(state);
        if over_budget {
            self.reclaim();
        }
    }

    /// Account for a band that is being dropped with blocks still resident.
    ///
    /// Dirty contents are lost; datasets flush their bands before letting
    /// them go, so this only triggers for bands leaked past their dataset.
    pub(crate) fn forget_band(&self, info: &BandInfo, directory: &mut BlockDirectory) {
        let blocks = directory.drain_all();
        if blocks.is_empty() {
            return;
        }
        let mut dirty = 0;
        {
            let mut state = self.inner.state.lock();
            for block in &blocks {
                if let Some(size) = state.lru.remove(&block.key()) {
                    state.resident_bytes -= size;
                }
                if block.is_dirty() {
                    dirty += 1;
                }
            }
            self.inner.changed.notify_all();
        }
        if dirty > 0 {
            warn!(
                dataset = %info.dataset,
                band = %info.band,
                dirty,
                "Band dropped with unflushed dirty blocks"
            );
        }
    }

    fn guard(&self, band: &Arc<RasterBand>, block: Arc<Block>, mode: AccessMode) -> BlockGuard {
        BlockGuard::lock(self.clone(), Arc::clone(band), block, mode)
    }

    /// Read a claimed block from the driver and make it resident, pinned once
    /// for the caller and once for every thread waiting on the claim.
    fn fill(&self, band: &Arc<RasterBand>, claim: &Arc<Claim>) -> Result<Arc<Block>, CacheError> {
        let key = claim.key();
        let mut pending = PendingFill {
            cache: self,
            band,
            claim,
            settled: false,
        };

        self.inner.hooks.at(HookPoint::FillUnlocked, &key);
        let expected = band.geometry().block_bytes();
        let result = band
            .driver()
            .read_block(band.info(), key.x, key.y)
            .and_then(|buffer| {
                if buffer.len() == expected {
                    Ok(buffer)
                } else {
                    Err(DriverError::SizeMismatch {
                        expected,
                        actual: buffer.len(),
                    })
                }
            });

        let mut state = self.inner.state.lock();
        let mut directory = band.directory.lock();
        pending.settled = true;

        match result {
            Ok(buffer) => {
                let block = Arc::new(Block::new(key, buffer, Arc::downgrade(band)));
                let waiters = claim.waiter_count();
                block.pin(1 + waiters);
                directory.resolve(key.x, key.y, Arc::clone(&block));
                state.lru.insert(&block);
                state.resident_bytes += block.size();
                claim.complete_fill(Arc::clone(&block));
                drop(directory);
                self.inner.changed.notify_all();
                drop(state);

                self.inner.counters.record_fill();
                debug!(block = %key, bytes = block.size(), waiters, "Filled block");
                Ok(block)
            }
            Err(err) => {
                directory.release_claim(key.x, key.y);
                let source = Arc::new(err);
                claim.fail(Arc::clone(&source));
                drop(directory);
                self.inner.changed.notify_all();
                drop(state);

                self.inner.counters.record_fill_failure();
                warn!(block = %key, error = %source, "Block fill failed");
                Err(CacheError::FillFailed { key, source })
            }
        }
    }

    fn evict_one(&self) -> bool {
        self.evict_next(false).is_some()
    }

    /// Evict while over budget; stops early when everything left is pinned.
    fn reclaim(&self) -> usize {
        let mut evicted = 0;
        while self.evict_next(true).is_some() {
            evicted += 1;
        }
        evicted
    }

    /// Evict the oldest unlocked block.
    ///
    /// Returns `None` if nothing was evicted, otherwise the write-back failure
    /// if there was one.
    fn evict_next(&self, only_over_budget: bool) -> Option<Option<WriteBackError>> {
        let mut state = self.inner.state.lock();
        if only_over_budget && state.resident_bytes <= state.budget_bytes {
            return None;
        }
        let (block, band) = state
            .lru
            .candidates()
            .find_map(|block| block.band().map(|band| (block, band)))?;

        let detached = {
            let mut directory = band.directory.lock();
            self.detach(&mut state, &mut directory, &band, block)
        };
        drop(state);
        drop(band);
        Some(self.complete_detach(detached))
    }

    /// Detach `band`'s blocks one by one until its directory is empty.
    ///
    /// Each pass walks a snapshot of the band's resident coordinates and
    /// re-checks every key under the lock. A pass that detaches nothing
    /// waits for a release or a finished write-back before looking again.
    fn drain_band(&self, band: &Arc<RasterBand>) -> (usize, Vec<WriteBackError>) {
        let mut flushed = 0;
        let mut failures = Vec::new();
        let mut state = self.inner.state.lock();

        loop {
            let keys = band.directory.lock().resident_keys();
            let mut progressed = false;

            for (x, y) in keys {
                let detached = {
                    let mut directory = band.directory.lock();
                    match directory.lookup(x, y) {
                        Some(block) if block.is_evictable() => {
                            self.detach(&mut state, &mut directory, band, block)
                        }
                        _ => continue,
                    }
                };
                let failure = MutexGuard::unlocked(&mut state, || self.complete_detach(detached));
                failures.extend(failure);
                flushed += 1;
                progressed = true;
            }

            if progressed {
                continue;
            }
            if band.directory.lock().is_empty() {
                break;
            }
            debug!(band = %band.id(), "Flush waiting for locked blocks");
            self.inner.changed.wait(&mut state);
        }
        drop(state);
        (flushed, failures)
    }

    /// Take an unpinned block out of the eviction list and its directory.
    ///
    /// Clean blocks are fully accounted for here. Dirty blocks leave a
    /// write-back claim in the directory and keep their bytes counted until
    /// [`complete_detach`](Self::complete_detach) has written them.
    fn detach(
        &self,
        state: &mut CacheState,
        directory: &mut BlockDirectory,
        band: &Arc<RasterBand>,
        block: Arc<Block>,
    ) -> Detached {
        let key = block.key();
        assert!(block.is_evictable(), "attempted to evict locked block {key}");
        assert!(
            state.lru.remove(&key).is_some(),
            "block {key} resident in its directory but missing from the eviction list"
        );

        let claim = if block.is_dirty() {
            let claim = Claim::write_back(key);
            let resident = directory.begin_write_back(key.x, key.y, Arc::clone(&claim));
            assert!(
                Arc::ptr_eq(&resident, &block),
                "directory entry for {key} is not the block being evicted"
            );
            Some(claim)
        } else {
            let resident = directory
                .remove(key.x, key.y)
                .unwrap_or_else(|| panic!("block {key} listed but not in its directory"));
            assert!(
                Arc::ptr_eq(&resident, &block),
                "directory entry for {key} is not the block being evicted"
            );
            state.resident_bytes -= block.size();
            None
        };

        Detached {
            band: Arc::clone(band),
            block,
            claim,
        }
    }

    /// Finish an eviction outside the global lock: write back if dirty, then
    /// release the key and free the buffer.
    fn complete_detach(&self, detached: Detached) -> Option<WriteBackError> {
        let Detached { band, block, claim } = detached;
        let key = block.key();
        self.inner.hooks.at(HookPoint::EvictUnlocked, &key);

        let Some(claim) = claim else {
            self.inner.counters.record_eviction();
            debug!(block = %key, "Evicted clean block");
            return None;
        };

        let outcome = {
            let data = block.read_data();
            band.driver().write_block(band.info(), key.x, key.y, &data)
        };
        let failure = match outcome {
            Ok(()) => {
                self.inner.counters.record_write_back();
                debug!(block = %key, bytes = block.size(), "Wrote back dirty block");
                None
            }
            Err(err) => {
                self.inner.counters.record_write_back_failure();
                let failure = WriteBackError {
                    key,
                    source: Arc::new(err),
                };
                warn!(block = %key, error = %failure.source, "Write-back failed, dropping block");
                self.inner.write_back_errors.lock().push(failure.clone());
                Some(failure)
            }
        };

        {
            let mut state = self.inner.state.lock();
            band.directory.lock().release_claim(key.x, key.y);
            state.resident_bytes -= block.size();
            claim.vacate();
            self.inner.changed.notify_all();
        }
        self.inner.counters.record_eviction();
        failure
    }
}

impl fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("BlockCache")
            .field("resident_bytes", &state.resident_bytes)
            .field("budget_bytes", &state.budget_bytes)
            .field("resident_blocks", &state.lru.len())
            .field("open_datasets", &state.open_datasets.len())
            .finish()
    }
}

/// Settles a fill claim with an error if the fill unwinds before landing, so
/// waiters are never stranded.
struct PendingFill<'a> {
    cache: &'a BlockCache,
    band: &'a Arc<RasterBand>,
    claim: &'a Arc<Claim>,
    settled: bool,
}

impl Drop for PendingFill<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let key = self.claim.key();
        let _state = self.cache.inner.state.lock();
        self.band.directory.lock().release_claim(key.x, key.y);
        self.claim.fail(Arc::new(DriverError::Backend(format!(
            "fill of block {key} was aborted"
        ))));
        self.cache.inner.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use crate::raster::{BandGeometry, DataType};

    const BLOCK: usize = 16 * 16;

    fn create_dataset(cache: &BlockCache, driver: &Arc<MemoryDriver>) -> Dataset {
        let geometry = BandGeometry::new(64, 64, 16, 16, DataType::Byte);
        Dataset::open(cache, driver.clone(), geometry, 2).unwrap()
    }

    fn cache_with_budget(blocks: usize) -> BlockCache {
        BlockCache::new(CacheConfig::default().with_budget_bytes(blocks * BLOCK))
    }

    #[test]
    fn test_hit_does_not_read_again() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let band = dataset.band(0).unwrap();

        let first = cache.get_locked_block(band, 1, 1, AccessMode::Read).unwrap();
        let data = first.data().to_vec();
        drop(first);
        let second = cache.get_locked_block(band, 1, 1, AccessMode::Read).unwrap();

        assert_eq!(second.data(), &data[..]);
        assert_eq!(driver.read_count(&band.block_key(1, 1)), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_out_of_bounds() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let band = dataset.band(0).unwrap();

        let err = cache
            .get_locked_block(band, 4, 0, AccessMode::Read)
            .unwrap_err();
        assert!(matches!(err, CacheError::OutOfBounds { x: 4, .. }));
    }

    #[test]
    fn test_fill_failure_leaves_no_trace() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let band = dataset.band(0).unwrap();
        driver.fail_reads(band.block_key(0, 0));

        let err = cache
            .get_locked_block(band, 0, 0, AccessMode::Read)
            .unwrap_err();
        assert!(matches!(err, CacheError::FillFailed { .. }));
        assert_eq!(cache.current_resident_bytes(), 0);
        assert_eq!(band.resident_block_count(), 0);
        assert!(band.directory.lock().is_empty());

        driver.clear_failures();
        assert!(cache.get_locked_block(band, 0, 0, AccessMode::Read).is_ok());
    }

    #[test]
    fn test_short_buffer_is_fill_failure() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let band = dataset.band(0).unwrap();
        driver.store(band.block_key(2, 2), vec![1; 10]);

        match cache.get_locked_block(band, 2, 2, AccessMode::Read) {
            Err(CacheError::FillFailed { source, .. }) => {
                assert!(matches!(
                    *source,
                    DriverError::SizeMismatch {
                        expected: BLOCK,
                        actual: 10
                    }
                ));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_lru_order_follows_access() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let band = dataset.band(0).unwrap();

        for x in 0..3 {
            drop(cache.get_locked_block(band, x, 0, AccessMode::Read).unwrap());
        }
        drop(cache.get_locked_block(band, 0, 0, AccessMode::Read).unwrap());

        let order: Vec<u32> = cache.resident_keys().iter().map(|k| k.x).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_flush_one_block_takes_oldest_unlocked() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let band = dataset.band(0).unwrap();

        let held = cache.get_locked_block(band, 0, 0, AccessMode::Read).unwrap();
        drop(cache.get_locked_block(band, 1, 0, AccessMode::Read).unwrap());

        assert!(cache.flush_one_block());
        assert!(cache.is_resident(&band.block_key(0, 0)));
        assert!(!cache.is_resident(&band.block_key(1, 0)));
        assert!(!cache.flush_one_block());
        drop(held);
    }

    #[test]
    fn test_lowering_budget_evicts() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let band = dataset.band(0).unwrap();

        for x in 0..4 {
            drop(cache.get_locked_block(band, x, 0, AccessMode::Read).unwrap());
        }
        assert_eq!(cache.current_resident_bytes(), 4 * BLOCK);

        cache.set_budget_bytes(2 * BLOCK);
        assert_eq!(cache.budget_bytes(), 2 * BLOCK);
        assert_eq!(cache.current_resident_bytes(), 2 * BLOCK);
        let order: Vec<u32> = cache.resident_keys().iter().map(|k| k.x).collect();
        assert_eq!(order, vec![2, 3]);
    }

    #[test]
    fn test_over_budget_while_everything_locked() {
        let cache = cache_with_budget(1);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let band = dataset.band(0).unwrap();

        let a = cache.get_locked_block(band, 0, 0, AccessMode::Read).unwrap();
        let b = cache.get_locked_block(band, 1, 0, AccessMode::Read).unwrap();
        assert_eq!(cache.current_resident_bytes(), 2 * BLOCK);

        drop(a);
        assert_eq!(cache.current_resident_bytes(), BLOCK);
        drop(b);
        assert_eq!(cache.current_resident_bytes(), BLOCK);
    }

    #[test]
    fn test_discard_drops_block_on_release() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let band = dataset.band(0).unwrap();
        let key = band.block_key(3, 3);

        let mut guard = cache.get_locked_block(band, 3, 3, AccessMode::Write).unwrap();
        guard.data_mut().fill(9);
        guard.mark_dirty();
        guard.discard();
        assert!(cache.is_resident(&key));
        guard.release();

        assert!(!cache.is_resident(&key));
        assert_eq!(driver.write_count(&key), 1);
        assert_eq!(driver.stored(&key).unwrap(), vec![9; BLOCK]);
    }

    #[test]
    #[should_panic(expected = "requires a write guard")]
    fn test_mark_dirty_on_read_guard_panics() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let band = dataset.band(0).unwrap();

        let guard = cache.get_locked_block(band, 0, 0, AccessMode::Read).unwrap();
        guard.mark_dirty();
    }

    #[test]
    fn test_flush_band_leaves_other_band() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let first = dataset.band(0).unwrap();
        let second = dataset.band(1).unwrap();

        drop(cache.get_locked_block(first, 0, 0, AccessMode::Read).unwrap());
        drop(cache.get_locked_block(second, 0, 0, AccessMode::Read).unwrap());

        assert_eq!(cache.flush_band(first).unwrap(), 1);
        assert_eq!(first.resident_block_count(), 0);
        assert_eq!(second.resident_block_count(), 1);
        assert_eq!(cache.current_resident_bytes(), BLOCK);
    }

    #[test]
    fn test_write_back_failure_still_reclaims() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let band = dataset.band(0).unwrap();
        let key = band.block_key(1, 2);
        driver.fail_writes(key);

        let guard = cache.get_locked_block(band, 1, 2, AccessMode::Write).unwrap();
        guard.mark_dirty();
        drop(guard);

        let err = cache.flush_band(band).unwrap_err();
        assert!(matches!(err, CacheError::WriteBackFailed { failed: 1, .. }));
        assert_eq!(cache.current_resident_bytes(), 0);
        assert_eq!(cache.stats().write_back_failures, 1);

        let reported = cache.take_write_back_errors();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].key, key);
        assert!(cache.take_write_back_errors().is_empty());
    }

    #[test]
    fn test_shutdown_after_close() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        drop(
            cache
                .get_locked_block(dataset.band(1).unwrap(), 2, 3, AccessMode::Read)
                .unwrap(),
        );
        assert_eq!(cache.open_dataset_count(), 1);
        dataset.close().unwrap();
        assert_eq!(cache.open_dataset_count(), 0);
        assert_eq!(cache.shutdown().unwrap(), 0);
    }

    #[test]
    fn test_shutdown_flushes_open_dataset() {
        let cache = cache_with_budget(8);
        let driver = Arc::new(MemoryDriver::new());
        let dataset = create_dataset(&cache, &driver);
        let band = Arc::clone(dataset.band(0).unwrap());
        drop(cache.get_locked_block(&band, 0, 0, AccessMode::Read).unwrap());

        assert_eq!(cache.clone().shutdown().unwrap(), 1);
        assert_eq!(cache.current_resident_bytes(), 0);
    }

    #[test]
    fn test_debug_format() {
        let cache = cache_with_budget(2);
        let debug = format!("{cache:?}");
        assert!(debug.contains("budget_bytes: 512"));
    }
}
