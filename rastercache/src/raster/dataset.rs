//! Raster dataset: a set of bands sharing one driver.

use crate::cache::{BandId, BlockCache, CacheError, DatasetId};
use crate::driver::BlockDriver;
use crate::raster::band::{BandInfo, RasterBand};
use crate::raster::geometry::BandGeometry;
use std::sync::Arc;
use tracing::{debug, warn};

/// An open raster dataset.
///
/// Opening registers the dataset with a cache; closing (or dropping) flushes
/// every block of every band back to the driver.
#[derive(Debug)]
pub struct Dataset {
    id: DatasetId,
    cache: BlockCache,
    bands: Vec<Arc<RasterBand>>,
    closed: bool,
}

impl Dataset {
    /// Open a dataset whose bands all share `geometry`.
    pub fn open(
        cache: &BlockCache,
        driver: Arc<dyn BlockDriver>,
        geometry: BandGeometry,
        band_count: usize,
    ) -> Result<Self, CacheError> {
        Self::open_with_bands(cache, driver, vec![geometry; band_count])
    }

    /// Open a dataset with one band per entry of `geometries`.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidGeometry`] if there are no bands or a band's
    /// geometry is degenerate.
    pub fn open_with_bands(
        cache: &BlockCache,
        driver: Arc<dyn BlockDriver>,
        geometries: Vec<BandGeometry>,
    ) -> Result<Self, CacheError> {
        if geometries.is_empty() {
            return Err(CacheError::InvalidGeometry(
                "dataset needs at least one band".to_string(),
            ));
        }
        for geometry in &geometries {
            geometry.validate()?;
        }

        let id = DatasetId(cache.allocate_id());
        let bands = geometries
            .into_iter()
            .enumerate()
            .map(|(index, geometry)| {
                let info = BandInfo {
                    dataset: id,
                    band: BandId(cache.allocate_id()),
                    index,
                    geometry,
                };
                Arc::new(RasterBand::new(info, Arc::clone(&driver), cache.clone()))
            })
            .collect::<Vec<_>>();

        cache.register_dataset(id);
        debug!(dataset = %id, bands = bands.len(), "Opened dataset");
        Ok(Self {
            id,
            cache: cache.clone(),
            bands,
            closed: false,
        })
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Band at zero-based `index`.
    pub fn band(&self, index: usize) -> Option<&Arc<RasterBand>> {
        self.bands.get(index)
    }

    pub fn bands(&self) -> &[Arc<RasterBand>] {
        &self.bands
    }

    /// Write back and drop every cached block of the dataset, keeping it open.
    pub fn flush(&self) -> Result<usize, CacheError> {
        self.cache.flush_all_for_dataset(self)
    }

    /// Flush and close the dataset.
    ///
    /// Returns the number of blocks flushed. Memory is reclaimed even when a
    /// write-back fails.
    pub fn close(mut self) -> Result<usize, CacheError> {
        let result = self.cache.flush_all_for_dataset(&self);
        self.closed = true;
        result
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if !self.closed {
            warn!(dataset = %self.id, "Dataset dropped without close, flushing");
            if let Err(err) = self.cache.flush_all_for_dataset(self) {
                warn!(dataset = %self.id, error = %err, "Flush on drop failed");
            }
        }
        self.cache.unregister_dataset(self.id);
        debug!(dataset = %self.id, "Closed dataset");
    }
}
