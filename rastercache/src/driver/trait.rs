//! Driver trait definition for dependency injection.

use crate::raster::BandInfo;
use thiserror::Error;

/// Errors reported by a block driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// I/O error from the underlying storage
    #[error("Driver I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Driver returned a buffer that does not match the band's block size
    #[error("Block buffer size mismatch: expected={expected}, actual={actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Backend-specific failure
    #[error("Driver backend error: {0}")]
    Backend(String),
}

/// Storage backend that fills blocks on a cache miss and persists dirty
/// blocks on eviction or flush.
///
/// The cache calls a driver from whichever thread needs the block, and never
/// while holding its global lock. Implementations must therefore be safe to
/// call concurrently, including for different blocks of the same band.
///
/// # Example
///
/// ```
/// use rastercache::driver::{BlockDriver, DriverError};
/// use rastercache::raster::BandInfo;
///
/// struct ZeroDriver;
///
/// impl BlockDriver for ZeroDriver {
///     fn read_block(&self, band: &BandInfo, _x: u32, _y: u32) -> Result<Vec<u8>, DriverError> {
///         Ok(vec![0; band.geometry.block_bytes()])
///     }
///
///     fn write_block(&self, _band: &BandInfo, _x: u32, _y: u32, _data: &[u8]) -> Result<(), DriverError> {
///         Ok(())
///     }
/// }
/// ```
pub trait BlockDriver: Send + Sync {
    /// Read the contents of block `(x, y)` of `band`.
    ///
    /// The returned buffer must be exactly `band.geometry.block_bytes()` long.
    fn read_block(&self, band: &BandInfo, x: u32, y: u32) -> Result<Vec<u8>, DriverError>;

    /// Persist the contents of block `(x, y)` of `band`.
    fn write_block(&self, band: &BandInfo, x: u32, y: u32, data: &[u8])
        -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_driver_error_from_io() {
        let err: DriverError = io::Error::new(io::ErrorKind::UnexpectedEof, "short read").into();
        assert!(matches!(err, DriverError::Io(_)));
        assert!(err.to_string().contains("short read"));
    }

    #[test]
    fn test_size_mismatch_message() {
        let err = DriverError::SizeMismatch {
            expected: 256,
            actual: 128,
        };
        assert_eq!(
            err.to_string(),
            "Block buffer size mismatch: expected=256, actual=128"
        );
    }

    #[test]
    fn test_driver_is_object_safe() {
        fn assert_object_safe(_: Option<&dyn BlockDriver>) {}
        assert_object_safe(None);
    }
}
