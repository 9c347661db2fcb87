//! Raster band geometry and pixel types.

use crate::cache::CacheError;
use std::fmt;

/// Pixel data type of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Byte,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    UInt64,
    Int64,
    Float32,
    Float64,
    /// Complex pair of 16-bit integers
    CInt16,
    /// Complex pair of 32-bit floats
    CFloat32,
    /// Complex pair of 64-bit floats
    CFloat64,
}

impl DataType {
    /// Bytes per pixel.
    pub fn size_bytes(self) -> usize {
        match self {
            Self::Byte | Self::Int8 => 1,
            Self::UInt16 | Self::Int16 => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 | Self::CInt16 => 4,
            Self::UInt64 | Self::Int64 | Self::Float64 | Self::CFloat32 => 8,
            Self::CFloat64 => 16,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Raster size and block layout of one band.
///
/// Edge blocks are not truncated: every block holds a full
/// `block_width * block_height` pixels even where the raster ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandGeometry {
    /// Raster width in pixels
    pub width: u32,
    /// Raster height in pixels
    pub height: u32,
    /// Block width in pixels
    pub block_width: u32,
    /// Block height in pixels
    pub block_height: u32,
    /// Pixel data type
    pub data_type: DataType,
}

impl BandGeometry {
    /// Create a band geometry.
    pub fn new(
        width: u32,
        height: u32,
        block_width: u32,
        block_height: u32,
        data_type: DataType,
    ) -> Self {
        Self {
            width,
            height,
            block_width,
            block_height,
            data_type,
        }
    }

    /// Reject geometries that cannot be split into blocks.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.width == 0 || self.height == 0 {
            return Err(CacheError::InvalidGeometry(format!(
                "raster size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.block_width == 0 || self.block_height == 0 {
            return Err(CacheError::InvalidGeometry(format!(
                "block size {}x{} is empty",
                self.block_width, self.block_height
            )));
        }
        Ok(())
    }

    /// Blocks per row.
    pub fn blocks_x(&self) -> u32 {
        self.width.div_ceil(self.block_width)
    }

    /// Blocks per column.
    pub fn blocks_y(&self) -> u32 {
        self.height.div_ceil(self.block_height)
    }

    /// Total blocks in the grid.
    pub fn block_count(&self) -> u64 {
        u64::from(self.blocks_x()) * u64::from(self.blocks_y())
    }

    /// Size of one block's buffer in bytes.
    pub fn block_bytes(&self) -> usize {
        self.block_width as usize * self.block_height as usize * self.data_type.size_bytes()
    }

    /// Check that `(x, y)` addresses a block inside the grid.
    pub fn check_block(&self, x: u32, y: u32) -> Result<(), CacheError> {
        let (blocks_x, blocks_y) = (self.blocks_x(), self.blocks_y());
        if x < blocks_x && y < blocks_y {
            Ok(())
        } else {
            Err(CacheError::OutOfBounds {
                x,
                y,
                blocks_x,
                blocks_y,
            })
        }
    }
}
