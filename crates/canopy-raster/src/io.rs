//! Raster I/O port

use canopy_core::error::Result;
use canopy_core::models::{BandRole, Grid, Window};
use canopy_geo::transform::{transform_bounds, CoordTransformer, DENSIFY_POINTS};
use ndarray::Array2;
use std::fmt;
use std::path::Path;

/// Resampling kernel used when warping onto a destination grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
    Nearest,
    Bilinear,
}

impl Resampling {
    /// Nearest for categorical bands, bilinear otherwise
    pub fn for_role(role: BandRole) -> Self {
        if role.is_categorical() {
            Resampling::Nearest
        } else {
            Resampling::Bilinear
        }
    }
}

impl fmt::Display for Resampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resampling::Nearest => write!(f, "nearest"),
            Resampling::Bilinear => write!(f, "bilinear"),
        }
    }
}

/// A georeferenced single-band array in its own CRS
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRaster {
    pub grid: Grid,
    pub data: Array2<f32>,
}

impl SourceRaster {
    pub fn new(grid: Grid, data: Array2<f32>) -> Self {
        Self { grid, data }
    }
}

/// Read access to a published raster, one window at a time
pub trait WindowedRaster: Send {
    fn grid(&self) -> &Grid;

    /// Read a window of band 1; nodata is `NaN`
    fn read_window(&self, window: &Window) -> Result<Array2<f32>>;
}

/// Raster backend: remote band reads, GeoTIFF writes, and windowed reads
pub trait RasterIo: Send + Sync {
    /// Native EPSG code of the raster at `href`
    fn band_epsg(&self, href: &str) -> Result<u32>;

    /// Read band 1 of `href` resampled onto `grid`, `NaN` where no data
    fn read_onto_grid(&self, href: &str, grid: &Grid, resampling: Resampling)
        -> Result<Array2<f32>>;

    /// Write a single-band float GeoTIFF with `NaN` nodata
    fn write_geotiff(&self, path: &Path, data: &Array2<f32>, grid: &Grid) -> Result<()>;

    /// Open a written raster for windowed reads
    fn open(&self, path: &Path) -> Result<Box<dyn WindowedRaster>>;
}

/// Source window covering the footprint of `dst`, padded by one pixel for
/// the bilinear kernel. `None` when the footprint misses the source.
pub fn source_window_for(src: &Grid, dst: &Grid) -> Result<Option<Window>> {
    let transformer = CoordTransformer::new(dst.epsg, src.epsg)?;
    let footprint = transform_bounds(&dst.bounds(), &transformer, DENSIFY_POINTS)?;

    let Some(window) = src.window_for_bounds(&footprint) else {
        return Ok(None);
    };

    let col_off = window.col_off.saturating_sub(1);
    let row_off = window.row_off.saturating_sub(1);
    let col_end = (window.col_off + window.width + 1).min(src.width);
    let row_end = (window.row_off + window.height + 1).min(src.height);

    Ok(Some(Window::new(col_off, row_off, col_end - col_off, row_end - row_off)))
}
