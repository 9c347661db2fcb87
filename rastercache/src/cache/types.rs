//! Core types for the block cache.

use crate::driver::DriverError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Identifier of an open dataset, unique within one [`BlockCache`](crate::cache::BlockCache).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(pub u64);

/// Identifier of a raster band, unique within one [`BlockCache`](crate::cache::BlockCache).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BandId(pub u64);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

impl fmt::Display for BandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Cache key uniquely identifying a block.
///
/// Immutable for the lifetime of the block it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    /// Owning dataset
    pub dataset: DatasetId,
    /// Owning band
    pub band: BandId,
    /// Block column
    pub x: u32,
    /// Block row
    pub y: u32,
}

impl BlockKey {
    /// Create a new block key.
    pub fn new(dataset: DatasetId, band: BandId, x: u32, y: u32) -> Self {
        Self {
            dataset,
            band,
            x,
            y,
        }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/({}, {})", self.dataset, self.band, self.x, self.y)
    }
}

/// Access mode requested for a locked block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Shared access; any number of readers may hold the block.
    Read,
    /// Exclusive access; required to modify the buffer or mark it dirty.
    Write,
}

/// A failed write-back of a dirty block.
///
/// The block's memory has already been reclaimed when this is reported.
#[derive(Debug, Clone, Error)]
#[error("write-back of block {key} failed: {source}")]
pub struct WriteBackError {
    /// Block that could not be written
    pub key: BlockKey,
    /// Driver failure
    #[source]
    pub source: Arc<DriverError>,
}

/// Cache-related errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The driver could not produce the block's data. Nothing was cached.
    #[error("failed to fill block {key}: {source}")]
    FillFailed {
        key: BlockKey,
        #[source]
        source: Arc<DriverError>,
    },

    /// Requested block lies outside the band's block grid.
    #[error("block ({x}, {y}) is outside the {blocks_x}x{blocks_y} block grid")]
    OutOfBounds {
        x: u32,
        y: u32,
        blocks_x: u32,
        blocks_y: u32,
    },

    /// One or more dirty blocks could not be written during a flush.
    #[error("{failed} block write-back(s) failed, first: {first}")]
    WriteBackFailed { failed: usize, first: WriteBackError },

    /// Band geometry cannot be cached (zero-sized blocks or raster).
    #[error("Invalid raster geometry: {0}")]
    InvalidGeometry(String),

    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Fold a list of write-back failures into a single error.
    ///
    /// Returns `None` when the list is empty.
    pub(crate) fn from_write_backs(mut failures: Vec<WriteBackError>) -> Option<Self> {
        if failures.is_empty() {
            return None;
        }
        let failed = failures.len();
        Some(Self::WriteBackFailed {
            failed,
            first: failures.swap_remove(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(x: u32, y: u32) -> BlockKey {
        BlockKey::new(DatasetId(1), BandId(2), x, y)
    }

    #[test]
    fn test_block_key_equality() {
        assert_eq!(key(3, 4), key(3, 4));
        assert_ne!(key(3, 4), key(4, 3));
        assert_ne!(key(3, 4), BlockKey::new(DatasetId(1), BandId(3), 3, 4));
        assert_ne!(key(3, 4), BlockKey::new(DatasetId(9), BandId(2), 3, 4));
    }

    #[test]
    fn test_block_key_display() {
        assert_eq!(key(3, 4).to_string(), "d1/b2/(3, 4)");
    }

    #[test]
    fn test_fill_error_message_names_block() {
        let err = CacheError::FillFailed {
            key: key(0, 7),
            source: Arc::new(DriverError::Backend("disk offline".into())),
        };
        let message = err.to_string();
        assert!(message.contains("d1/b2/(0, 7)"));
        assert!(message.contains("disk offline"));
    }

    #[test]
    fn test_from_write_backs_empty() {
        assert!(CacheError::from_write_backs(Vec::new()).is_none());
    }

    #[test]
    fn test_from_write_backs_counts_failures() {
        let failure = |x| WriteBackError {
            key: key(x, 0),
            source: Arc::new(DriverError::Backend("read-only".into())),
        };
        let err = CacheError::from_write_backs(vec![failure(1), failure(2)]).unwrap();
        match err {
            CacheError::WriteBackFailed { failed, first } => {
                assert_eq!(failed, 2);
                assert_eq!(first.key, key(1, 0));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
