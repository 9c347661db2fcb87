//! Raster band: one layer of a dataset, owning its block directory.

use crate::cache::{
    AccessMode, BandId, BlockCache, BlockDirectory, BlockGuard, BlockKey, CacheError, DatasetId,
};
use crate::driver::BlockDriver;
use crate::raster::geometry::BandGeometry;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// What a driver needs to know about a band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandInfo {
    /// Owning dataset
    pub dataset: DatasetId,
    /// Cache-wide band identifier
    pub band: BandId,
    /// Zero-based position of the band within its dataset
    pub index: usize,
    /// Raster and block layout
    pub geometry: BandGeometry,
}

/// One band of an open dataset.
///
/// Bands are shared as `Arc<RasterBand>`; resident blocks point back to
/// their band weakly, so a band is never kept alive by the cache.
pub struct RasterBand {
    info: BandInfo,
    driver: Arc<dyn BlockDriver>,
    cache: BlockCache,
    pub(crate) directory: Mutex<BlockDirectory>,
}

impl RasterBand {
    pub(crate) fn new(info: BandInfo, driver: Arc<dyn BlockDriver>, cache: BlockCache) -> Self {
        let directory = BlockDirectory::new(
            cache.directory_strategy(),
            info.geometry.blocks_x(),
            info.geometry.blocks_y(),
        );
        Self {
            info,
            driver,
            cache,
            directory: Mutex::new(directory),
        }
    }

    pub fn info(&self) -> &BandInfo {
        &self.info
    }

    pub fn id(&self) -> BandId {
        self.info.band
    }

    pub fn dataset_id(&self) -> DatasetId {
        self.info.dataset
    }

    pub fn index(&self) -> usize {
        self.info.index
    }

    pub fn geometry(&self) -> &BandGeometry {
        &self.info.geometry
    }

    /// Cache key of block `(x, y)` of this band.
    pub fn block_key(&self, x: u32, y: u32) -> BlockKey {
        BlockKey::new(self.info.dataset, self.info.band, x, y)
    }

    /// Number of blocks of this band currently resident.
    pub fn resident_block_count(&self) -> usize {
        self.directory.lock().resident_count()
    }

    pub(crate) fn driver(&self) -> &dyn BlockDriver {
        self.driver.as_ref()
    }

    /// Lock block `(x, y)` through the band's cache.
    pub fn lock_block(
        self: &Arc<Self>,
        x: u32,
        y: u32,
        mode: AccessMode,
    ) -> Result<BlockGuard, CacheError> {
        self.cache.get_locked_block(self, x, y, mode)
    }

    /// Copy of block `(x, y)`.
    pub fn read_block(self: &Arc<Self>, x: u32, y: u32) -> Result<Vec<u8>, CacheError> {
        let guard = self.lock_block(x, y, AccessMode::Read)?;
        Ok(guard.data().to_vec())
    }

    /// Overwrite block `(x, y)` in the cache and mark it dirty.
    ///
    /// The driver sees the new contents when the block is evicted or flushed.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidGeometry`] if `data` is not exactly one block long.
    pub fn write_block(self: &Arc<Self>, x: u32, y: u32, data: &[u8]) -> Result<(), CacheError> {
        let expected = self.geometry().block_bytes();
        if data.len() != expected {
            return Err(CacheError::InvalidGeometry(format!(
                "block write of {} bytes, expected {expected}",
                data.len()
            )));
        }
        let mut guard = self.lock_block(x, y, AccessMode::Write)?;
        guard.data_mut().copy_from_slice(data);
        guard.mark_dirty();
        Ok(())
    }

    /// Write back and drop every cached block of this band.
    pub fn flush(self: &Arc<Self>) -> Result<usize, CacheError> {
        self.cache.flush_band(self)
    }
}

impl Drop for RasterBand {
    fn drop(&mut self) {
        self.cache.forget_band(&self.info, self.directory.get_mut());
    }
}

impl fmt::Debug for RasterBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterBand")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::driver::MemoryDriver;
    use crate::raster::{DataType, Dataset};

    fn create_dataset(cache: &BlockCache) -> (Dataset, Arc<MemoryDriver>) {
        let driver = Arc::new(MemoryDriver::new());
        let geometry = BandGeometry::new(32, 32, 8, 8, DataType::Int16);
        let dataset = Dataset::open(cache, driver.clone(), geometry, 1).unwrap();
        (dataset, driver)
    }

    #[test]
    fn test_block_key_carries_identity() {
        let cache = BlockCache::new(CacheConfig::default());
        let (dataset, _) = create_dataset(&cache);
        let band = dataset.band(0).unwrap();

        let key = band.block_key(2, 3);
        assert_eq!(key.dataset, dataset.id());
        assert_eq!(key.band, band.id());
        assert_eq!((key.x, key.y), (2, 3));
        assert_eq!(band.index(), 0);
    }

    #[test]
    fn test_write_then_read_block() {
        let cache = BlockCache::new(CacheConfig::default());
        let (dataset, driver) = create_dataset(&cache);
        let band = dataset.band(0).unwrap();
        let payload = vec![5u8; 8 * 8 * 2];

        band.write_block(1, 1, &payload).unwrap();
        assert_eq!(band.read_block(1, 1).unwrap(), payload);
        assert_eq!(driver.write_count(&band.block_key(1, 1)), 0);

        assert_eq!(band.flush().unwrap(), 1);
        assert_eq!(driver.stored(&band.block_key(1, 1)).unwrap(), payload);
    }

    #[test]
    fn test_write_block_rejects_wrong_length() {
        let cache = BlockCache::new(CacheConfig::default());
        let (dataset, _) = create_dataset(&cache);
        let band = dataset.band(0).unwrap();

        let err = band.write_block(0, 0, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CacheError::InvalidGeometry(_)));
        assert_eq!(band.resident_block_count(), 0);
    }

    #[test]
    fn test_leaked_band_releases_its_bytes() {
        let cache = BlockCache::new(CacheConfig::default());
        let (dataset, _) = create_dataset(&cache);
        let band = Arc::clone(dataset.band(0).unwrap());
        dataset.close().unwrap();

        band.read_block(0, 0).unwrap();
        assert_eq!(cache.current_resident_bytes(), 128);

        drop(band);
        assert_eq!(cache.current_resident_bytes(), 0);
        assert_eq!(cache.resident_block_count(), 0);
    }
}
