//! Datasets, bands and their block geometry.

mod band;
mod dataset;
mod geometry;

pub use band::{BandInfo, RasterBand};
pub use dataset::Dataset;
pub use geometry::{BandGeometry, DataType};
