//! In-memory block driver for tests and examples.

use crate::cache::BlockKey;
use crate::driver::{BlockDriver, DriverError};
use crate::raster::BandInfo;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct MemoryState {
    blocks: HashMap<BlockKey, Vec<u8>>,
    reads: HashMap<BlockKey, u64>,
    writes: HashMap<BlockKey, u64>,
    failing_reads: HashSet<BlockKey>,
    failing_writes: HashSet<BlockKey>,
}

/// Driver that keeps blocks in a hash map and counts every call.
///
/// Blocks that were never written read back as [`MemoryDriver::pattern`], so
/// tests can tell blocks apart without seeding them. Reads and writes can be
/// made to fail per key.
#[derive(Default)]
pub struct MemoryDriver {
    state: Mutex<MemoryState>,
    read_delay: Option<Duration>,
    total_reads: AtomicU64,
    total_writes: AtomicU64,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every read, outside the driver's own lock.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Contents of a block that was never written.
    pub fn pattern(key: &BlockKey, len: usize) -> Vec<u8> {
        let seed = key
            .x
            .wrapping_mul(31)
            .wrapping_add(key.y.wrapping_mul(17))
            .wrapping_add((key.band.0 as u32).wrapping_mul(7));
        (0..len)
            .map(|i| seed.wrapping_add(i as u32) as u8)
            .collect()
    }

    /// Seed the stored contents of a block.
    pub fn store(&self, key: BlockKey, data: Vec<u8>) {
        self.state.lock().blocks.insert(key, data);
    }

    /// Last contents written (or seeded) for a block.
    pub fn stored(&self, key: &BlockKey) -> Option<Vec<u8>> {
        self.state.lock().blocks.get(key).cloned()
    }

    /// Number of reads issued for `key`.
    pub fn read_count(&self, key: &BlockKey) -> u64 {
        self.state.lock().reads.get(key).copied().unwrap_or(0)
    }

    /// Number of writes issued for `key`, failed ones included.
    pub fn write_count(&self, key: &BlockKey) -> u64 {
        self.state.lock().writes.get(key).copied().unwrap_or(0)
    }

    pub fn total_reads(&self) -> u64 {
        self.total_reads.load(Ordering::SeqCst)
    }

    pub fn total_writes(&self) -> u64 {
        self.total_writes.load(Ordering::SeqCst)
    }

    /// Make every read of `key` fail until [`clear_failures`](Self::clear_failures).
    pub fn fail_reads(&self, key: BlockKey) {
        self.state.lock().failing_reads.insert(key);
    }

    /// Make every write of `key` fail until [`clear_failures`](Self::clear_failures).
    pub fn fail_writes(&self, key: BlockKey) {
        self.state.lock().failing_writes.insert(key);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_reads.clear();
        state.failing_writes.clear();
    }
}

impl BlockDriver for MemoryDriver {
    fn read_block(&self, band: &BandInfo, x: u32, y: u32) -> Result<Vec<u8>, DriverError> {
        let key = BlockKey::new(band.dataset, band.band, x, y);
        self.total_reads.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            *state.reads.entry(key).or_default() += 1;
            if state.failing_reads.contains(&key) {
                return Err(DriverError::Backend(format!("injected read failure for {key}")));
            }
        }

        if let Some(delay) = self.read_delay {
            thread::sleep(delay);
        }

        let stored = self.state.lock().blocks.get(&key).cloned();
        Ok(stored.unwrap_or_else(|| Self::pattern(&key, band.geometry.block_bytes())))
    }

    fn write_block(
        &self,
        band: &BandInfo,
        x: u32,
        y: u32,
        data: &[u8],
    ) -> Result<(), DriverError> {
        let key = BlockKey::new(band.dataset, band.band, x, y);
        self.total_writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        *state.writes.entry(key).or_default() += 1;
        if state.failing_writes.contains(&key) {
            return Err(DriverError::Backend(format!("injected write failure for {key}")));
        }
        state.blocks.insert(key, data.to_vec());
        Ok(())
    }
}
