//! Block driver backed by one raw file per dataset.

use crate::driver::{BlockDriver, DriverError};
use crate::raster::{BandGeometry, BandInfo};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Stores every band of a dataset in a single uncompressed file.
///
/// Blocks are laid out band by band, row by row:
///
/// ```text
/// offset = ((band_index * blocks_y + y) * blocks_x + x) * block_bytes
/// ```
///
/// Every band of the dataset must share one geometry: the first band seen
/// fixes it, and requests for a band with any other geometry fail. Blocks
/// past the end of the file read as zeros, so a fresh file behaves like a
/// blank raster.
#[derive(Debug)]
pub struct FileDriver {
    path: PathBuf,
    file: Mutex<File>,
    geometry: OnceLock<BandGeometry>,
}

impl FileDriver {
    /// Open `path` for reading and writing, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        debug!(path = %path.display(), "Opened raster file");
        Ok(Self {
            path,
            file: Mutex::new(file),
            geometry: OnceLock::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush written blocks to stable storage.
    pub fn sync(&self) -> Result<(), DriverError> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    fn check_geometry(&self, band: &BandInfo) -> Result<(), DriverError> {
        let expected = self.geometry.get_or_init(|| band.geometry);
        if *expected != band.geometry {
            return Err(DriverError::Backend(format!(
                "band {} geometry {:?} differs from the file layout {:?}",
                band.index, band.geometry, expected
            )));
        }
        Ok(())
    }

    fn offset(band: &BandInfo, x: u32, y: u32) -> u64 {
        let geometry = &band.geometry;
        let row = band.index as u64 * u64::from(geometry.blocks_y()) + u64::from(y);
        (row * u64::from(geometry.blocks_x()) + u64::from(x)) * geometry.block_bytes() as u64
    }
}

impl BlockDriver for FileDriver {
    fn read_block(&self, band: &BandInfo, x: u32, y: u32) -> Result<Vec<u8>, DriverError> {
        self.check_geometry(band)?;
        let mut buffer = vec![0u8; band.geometry.block_bytes()];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::offset(band, x, y)))?;

        let mut filled = 0;
        while filled < buffer.len() {
            match file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buffer)
    }

    fn write_block(
        &self,
        band: &BandInfo,
        x: u32,
        y: u32,
        data: &[u8],
    ) -> Result<(), DriverError> {
        self.check_geometry(band)?;
        let expected = band.geometry.block_bytes();
        if data.len() != expected {
            return Err(DriverError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::offset(band, x, y)))?;
        file.write_all(data)?;
        Ok(())
    }
}
