//! rastercache - shared block cache for tiled raster datasets
//!
//! Raster bands are split into fixed-size blocks. Every dataset opened
//! against a [`BlockCache`](cache::BlockCache) shares one memory budget:
//! blocks are read from a [`BlockDriver`](driver::BlockDriver) on demand,
//! locked through scoped guards, and written back when evicted or flushed.
//!
//! ```
//! use std::sync::Arc;
//! use rastercache::cache::BlockCache;
//! use rastercache::config::CacheConfig;
//! use rastercache::driver::MemoryDriver;
//! use rastercache::raster::{BandGeometry, DataType, Dataset};
//!
//! let cache = BlockCache::new(CacheConfig::default());
//! let geometry = BandGeometry::new(1024, 1024, 256, 256, DataType::Float32);
//! let dataset = Dataset::open(&cache, Arc::new(MemoryDriver::new()), geometry, 3)?;
//!
//! let band = dataset.band(2).unwrap();
//! band.write_block(3, 3, &vec![0; 256 * 256 * 4])?;
//! assert_eq!(band.read_block(3, 3)?.len(), 256 * 256 * 4);
//!
//! dataset.close()?;
//! # Ok::<(), rastercache::cache::CacheError>(())
//! ```

pub mod cache;
pub mod config;
pub mod driver;
pub mod raster;
