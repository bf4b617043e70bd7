//! In-memory raster backend.
//!
//! Remote bands are registered as arrays keyed by href. Written rasters go
//! to disk in a small self-describing format (a JSON grid header followed
//! by little-endian `f32` samples) so that file moves and copies behave the
//! same way they do for GeoTIFFs.

use crate::io::{source_window_for, RasterIo, Resampling, SourceRaster, WindowedRaster};
use crate::warp::warp;
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::{Grid, Window};
use ndarray::{s, Array2};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

const MAGIC: &str = "CANOPY-RASTER 1";

/// Raster backend holding source bands in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryRasterIo {
    sources: Arc<RwLock<HashMap<String, SourceRaster>>>,
    failures: Arc<Mutex<HashMap<String, usize>>>,
    reads: Arc<Mutex<HashMap<String, usize>>>,
    stalls: Arc<Mutex<HashMap<String, Duration>>>,
}

impl MemoryRasterIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source band under `href`
    pub fn insert_source(&self, href: impl Into<String>, raster: SourceRaster) -> Result<()> {
        let mut sources = self
            .sources
            .write()
            .map_err(|e| CanopyError::Raster(format!("Failed to acquire write lock: {}", e)))?;
        sources.insert(href.into(), raster);
        Ok(())
    }

    /// Make the next `count` reads of `href` fail as if the network dropped
    pub fn fail_next(&self, href: impl Into<String>, count: usize) -> Result<()> {
        let mut failures = self
            .failures
            .lock()
            .map_err(|e| CanopyError::Raster(format!("Failed to acquire lock: {}", e)))?;
        failures.insert(href.into(), count);
        Ok(())
    }

    /// Make every read of `href` block for `delay` before answering
    pub fn stall_reads(&self, href: impl Into<String>, delay: Duration) -> Result<()> {
        let mut stalls = self
            .stalls
            .lock()
            .map_err(|e| CanopyError::Raster(format!("Failed to acquire lock: {}", e)))?;
        stalls.insert(href.into(), delay);
        Ok(())
    }

    /// Number of read attempts made against `href`
    pub fn read_count(&self, href: &str) -> usize {
        self.reads.lock().map(|reads| reads.get(href).copied().unwrap_or(0)).unwrap_or(0)
    }

    fn source(&self, href: &str) -> Result<SourceRaster> {
        let sources = self
            .sources
            .read()
            .map_err(|e| CanopyError::Raster(format!("Failed to acquire read lock: {}", e)))?;
        sources
            .get(href)
            .cloned()
            .ok_or_else(|| CanopyError::Raster(format!("no raster registered at {}", href)))
    }

    fn record_read(&self, href: &str) -> Result<()> {
        if let Ok(mut reads) = self.reads.lock() {
            *reads.entry(href.to_string()).or_insert(0) += 1;
        }

        let stall = self.stalls.lock().ok().and_then(|stalls| stalls.get(href).copied());
        if let Some(delay) = stall {
            std::thread::sleep(delay);
        }

        let mut failures = self
            .failures
            .lock()
            .map_err(|e| CanopyError::Raster(format!("Failed to acquire lock: {}", e)))?;
        if let Some(remaining) = failures.get_mut(href) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CanopyError::Raster(format!("simulated read failure for {}", href)));
            }
        }
        Ok(())
    }
}

impl RasterIo for MemoryRasterIo {
    fn band_epsg(&self, href: &str) -> Result<u32> {
        Ok(self.source(href)?.grid.epsg)
    }

    fn read_onto_grid(
        &self,
        href: &str,
        grid: &Grid,
        resampling: Resampling,
    ) -> Result<Array2<f32>> {
        self.record_read(href)?;
        let source = self.source(href)?;

        let Some(window) = source_window_for(&source.grid, grid)? else {
            return Ok(Array2::from_elem(grid.shape(), f32::NAN));
        };

        let data = slice_window(&source.data, &window).to_owned();
        let windowed = SourceRaster::new(source.grid.window_grid(&window), data);
        warp(&windowed, grid, resampling)
    }

    fn write_geotiff(&self, path: &Path, data: &Array2<f32>, grid: &Grid) -> Result<()> {
        if data.dim() != grid.shape() {
            return Err(CanopyError::Raster(format!(
                "array shape {:?} does not match grid shape {:?}",
                data.dim(),
                grid.shape()
            )));
        }

        let mut file = File::create(path)?;
        writeln!(file, "{}", MAGIC)?;
        writeln!(file, "{}", serde_json::to_string(grid)?)?;

        let mut bytes = Vec::with_capacity(data.len() * 4);
        for v in data.iter() {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn WindowedRaster>> {
        Ok(Box::new(read_raster_file(path)?))
    }
}

fn slice_window<'a>(data: &'a Array2<f32>, window: &Window) -> ndarray::ArrayView2<'a, f32> {
    data.slice(s![
        window.row_off..window.row_off + window.height,
        window.col_off..window.col_off + window.width
    ])
}

/// Load a raster written by [`MemoryRasterIo::write_geotiff`]
pub fn read_raster_file(path: &Path) -> Result<SourceRaster> {
    let invalid = |reason: &str| CanopyError::Raster(format!("{}: {}", path.display(), reason));

    let mut reader = BufReader::new(File::open(path)?);
    let mut magic = String::new();
    reader.read_line(&mut magic)?;
    if magic.trim_end() != MAGIC {
        return Err(invalid("not a canopy raster file"));
    }

    let mut header = String::new();
    reader.read_line(&mut header)?;
    let grid: Grid = serde_json::from_str(header.trim_end())?;

    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    if bytes.len() != grid.pixel_count() * 4 {
        return Err(invalid("sample count does not match grid"));
    }

    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let data = Array2::from_shape_vec(grid.shape(), samples)
        .map_err(|e| invalid(&e.to_string()))?;

    Ok(SourceRaster::new(grid, data))
}

impl WindowedRaster for SourceRaster {
    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn read_window(&self, window: &Window) -> Result<Array2<f32>> {
        if window.col_off + window.width > self.grid.width
            || window.row_off + window.height > self.grid.height
        {
            return Err(CanopyError::Raster(format!(
                "window {:?} exceeds raster {}x{}",
                window, self.grid.width, self.grid.height
            )));
        }
        Ok(slice_window(&self.data, window).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::models::GeoTransform;
    use ndarray::array;
    use std::fs;
    use tempfile::TempDir;

    fn grid(cols: usize, rows: usize) -> Grid {
        Grid::new(32630, GeoTransform::new(0.0, 100.0, 10.0, -10.0), cols, rows)
    }

    #[test]
    fn test_write_and_window_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("composite.tif");
        let io = MemoryRasterIo::new();
        let data = array![[1.0, 2.0, 3.0], [4.0, f32::NAN, 6.0]];

        io.write_geotiff(&path, &data, &grid(3, 2)).unwrap();
        let raster = io.open(&path).unwrap();

        assert_eq!(raster.grid(), &grid(3, 2));
        let window = raster.read_window(&Window::new(1, 0, 2, 2)).unwrap();
        assert_eq!(window[[0, 0]], 2.0);
        assert!(window[[1, 0]].is_nan());
        assert!(raster.read_window(&Window::new(2, 0, 2, 1)).is_err());
    }

    #[test]
    fn test_read_onto_grid() {
        let io = MemoryRasterIo::new();
        io.insert_source("mem://b04", SourceRaster::new(grid(2, 2), array![[1.0, 2.0], [3.0, 4.0]]))
            .unwrap();

        let out = io.read_onto_grid("mem://b04", &grid(2, 2), Resampling::Nearest).unwrap();
        assert_eq!(out, array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(io.band_epsg("mem://b04").unwrap(), 32630);
        assert_eq!(io.read_count("mem://b04"), 1);
    }

    #[test]
    fn test_simulated_failures() {
        let io = MemoryRasterIo::new();
        io.insert_source("mem://b08", SourceRaster::new(grid(1, 1), array![[5.0]])).unwrap();
        io.fail_next("mem://b08", 1).unwrap();

        assert!(io.read_onto_grid("mem://b08", &grid(1, 1), Resampling::Nearest).is_err());
        assert!(io.read_onto_grid("mem://b08", &grid(1, 1), Resampling::Nearest).is_ok());
    }

    #[test]
    fn test_unknown_href() {
        let io = MemoryRasterIo::new();
        assert!(io.read_onto_grid("mem://missing", &grid(1, 1), Resampling::Nearest).is_err());
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.tif");
        fs::write(&path, b"II*\0").unwrap();
        assert!(read_raster_file(&path).is_err());
    }
}
