//! Canopy Raster - Band arrays, resampling, masking, and compositing
//!
//! All arrays are `ndarray::Array2<f32>` shaped `(rows, cols)` with `NaN`
//! as nodata. Raster file access goes through the [`io::RasterIo`] port.

pub mod colormap;
pub mod composite;
pub mod io;
pub mod mask;
pub mod memory;
pub mod quality;
pub mod stats;
pub mod warp;

#[cfg(feature = "gdal")]
pub mod gdal_io;

pub use io::{RasterIo, Resampling, SourceRaster, WindowedRaster};
pub use memory::MemoryRasterIo;
