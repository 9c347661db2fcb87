//! Cache over a file-backed driver: data written through one cache is read
//! back through another after the dataset is closed.

use rastercache::cache::{AccessMode, BlockCache};
use rastercache::config::CacheConfig;
use rastercache::driver::FileDriver;
use rastercache::raster::{BandGeometry, DataType, Dataset};
use std::sync::Arc;
use tempfile::TempDir;

fn geometry() -> BandGeometry {
    // 3x2 grid with partial edge blocks
    BandGeometry::new(100, 60, 40, 32, DataType::Float32)
}

#[test]
fn test_round_trip_through_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("scene.raw");
    let block_bytes = geometry().block_bytes();

    {
        let cache = BlockCache::new(CacheConfig::default().with_budget_bytes(2 * block_bytes));
        let driver = Arc::new(FileDriver::open(&path).unwrap());
        let dataset = Dataset::open(&cache, driver, geometry(), 2).unwrap();
        for (index, band) in dataset.bands().iter().enumerate() {
            for y in 0..2 {
                for x in 0..3 {
                    let value = (index * 10 + (y * 3 + x) as usize) as u8;
                    band.write_block(x, y, &vec![value; block_bytes]).unwrap();
                }
            }
        }
        assert!(cache.stats().write_backs > 0);
        dataset.close().unwrap();
        cache.shutdown().unwrap();
    }

    let file_len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(file_len, (2 * 6 * block_bytes) as u64);

    let cache = BlockCache::new(CacheConfig::default());
    let driver = Arc::new(FileDriver::open(&path).unwrap());
    let dataset = Dataset::open(&cache, driver, geometry(), 2).unwrap();
    let band = dataset.band(1).unwrap();
    let guard = cache.get_locked_block(band, 2, 1, AccessMode::Read).unwrap();
    assert_eq!(guard.data(), &vec![15; block_bytes][..]);
    drop(guard);
    assert_eq!(dataset.band(0).unwrap().read_block(1, 0).unwrap(), vec![1; block_bytes]);
}

#[test]
fn test_unwritten_blocks_read_as_zero() {
    let temp = TempDir::new().unwrap();
    let cache = BlockCache::new(CacheConfig::default());
    let driver = Arc::new(FileDriver::open(temp.path().join("empty.raw")).unwrap());
    let dataset = Dataset::open(&cache, driver, geometry(), 1).unwrap();

    let data = dataset.band(0).unwrap().read_block(2, 1).unwrap();
    assert_eq!(data, vec![0; geometry().block_bytes()]);
    assert_eq!(dataset.close().unwrap(), 1);
}
