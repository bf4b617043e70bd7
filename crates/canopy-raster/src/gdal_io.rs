//! GDAL raster backend.
//!
//! Remote assets are read through `/vsicurl/`, windowed to the destination
//! footprint, then warped with the crate's own resampler.

use crate::io::{source_window_for, RasterIo, Resampling, SourceRaster, WindowedRaster};
use crate::warp::warp;
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::{GeoTransform, Grid, Window};
use gdal::raster::{Buffer, RasterCreationOptions};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

fn gdal_err(context: &str, e: gdal::errors::GdalError) -> CanopyError {
    CanopyError::Raster(format!("{}: {}", context, e))
}

/// GDAL path for an href; http(s) URLs go through the curl VSI handler
pub fn vsi_path(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        format!("/vsicurl/{}", href)
    } else {
        href.to_string()
    }
}

/// Whole-request limit for `/vsicurl/` reads, in seconds
pub const HTTP_TIMEOUT_SECS: u64 = 60;
/// Connection limit for `/vsicurl/` reads, in seconds
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Raster backend built on GDAL
#[derive(Debug, Clone)]
pub struct GdalRasterIo;

impl GdalRasterIo {
    /// Backend whose remote reads give up after [`HTTP_TIMEOUT_SECS`]
    pub fn new() -> Result<Self> {
        Self::with_http_timeouts(HTTP_TIMEOUT_SECS, HTTP_CONNECT_TIMEOUT_SECS)
    }

    /// GDAL keeps these process-wide, so the last backend created wins
    pub fn with_http_timeouts(timeout_secs: u64, connect_secs: u64) -> Result<Self> {
        for (key, value) in [
            ("GDAL_HTTP_TIMEOUT", timeout_secs),
            ("GDAL_HTTP_CONNECTTIMEOUT", connect_secs),
        ] {
            gdal::config::set_config_option(key, &value.to_string())
                .map_err(|e| gdal_err(key, e))?;
        }
        tracing::debug!(timeout_secs, connect_secs, "GDAL HTTP timeouts set");
        Ok(Self)
    }
}

fn dataset_grid(dataset: &Dataset, context: &str) -> Result<Grid> {
    let (width, height) = dataset.raster_size();
    let gt = dataset.geo_transform().map_err(|e| gdal_err(context, e))?;
    if gt[2] != 0.0 || gt[4] != 0.0 {
        return Err(CanopyError::Raster(format!("{}: rotated rasters are not supported", context)));
    }
    let epsg = dataset_epsg(dataset, context)?;
    Ok(Grid::new(epsg, GeoTransform::from_gdal(gt), width, height))
}

fn dataset_epsg(dataset: &Dataset, context: &str) -> Result<u32> {
    let srs = dataset.spatial_ref().map_err(|e| gdal_err(context, e))?;
    let code = srs.auth_code().map_err(|e| gdal_err(context, e))?;
    u32::try_from(code)
        .map_err(|_| CanopyError::Raster(format!("{}: invalid EPSG code {}", context, code)))
}

fn read_band_window(dataset: &Dataset, window: &Window, context: &str) -> Result<Array2<f32>> {
    let band = dataset.rasterband(1).map_err(|e| gdal_err(context, e))?;
    let nodata = band.no_data_value();

    let buffer = band
        .read_as::<f32>(
            (window.col_off as isize, window.row_off as isize),
            (window.width, window.height),
            (window.width, window.height),
            None,
        )
        .map_err(|e| gdal_err(context, e))?;

    let mut data = Array2::from_shape_vec((window.height, window.width), buffer.data().to_vec())
        .map_err(|e| CanopyError::Raster(format!("{}: {}", context, e)))?;

    if let Some(nodata) = nodata {
        let nodata = nodata as f32;
        data.mapv_inplace(|v| if v == nodata { f32::NAN } else { v });
    }
    Ok(data)
}

impl RasterIo for GdalRasterIo {
    fn band_epsg(&self, href: &str) -> Result<u32> {
        let dataset = Dataset::open(vsi_path(href)).map_err(|e| gdal_err(href, e))?;
        dataset_epsg(&dataset, href)
    }

    fn read_onto_grid(
        &self,
        href: &str,
        grid: &Grid,
        resampling: Resampling,
    ) -> Result<Array2<f32>> {
        let dataset = Dataset::open(vsi_path(href)).map_err(|e| gdal_err(href, e))?;
        let src_grid = dataset_grid(&dataset, href)?;

        let Some(window) = source_window_for(&src_grid, grid)? else {
            tracing::debug!(href, "Asset does not overlap the destination grid");
            return Ok(Array2::from_elem(grid.shape(), f32::NAN));
        };

        let data = read_band_window(&dataset, &window, href)?;
        let source = SourceRaster::new(src_grid.window_grid(&window), data);
        warp(&source, grid, resampling)
    }

    fn write_geotiff(&self, path: &Path, data: &Array2<f32>, grid: &Grid) -> Result<()> {
        let context = path.display().to_string();
        let driver =
            DriverManager::get_driver_by_name("GTiff").map_err(|e| gdal_err(&context, e))?;

        let mut options = RasterCreationOptions::new();
        for (key, value) in [("COMPRESS", "DEFLATE"), ("TILED", "YES")] {
            options.set_name_value(key, value).map_err(|e| gdal_err(&context, e))?;
        }

        let mut dataset = driver
            .create_with_band_type_with_options::<f32, _>(
                path,
                grid.width,
                grid.height,
                1,
                &options,
            )
            .map_err(|e| gdal_err(&context, e))?;

        dataset.set_geo_transform(&grid.transform.to_gdal()).map_err(|e| gdal_err(&context, e))?;
        let srs = SpatialRef::from_epsg(grid.epsg).map_err(|e| gdal_err(&context, e))?;
        dataset.set_spatial_ref(&srs).map_err(|e| gdal_err(&context, e))?;

        let mut band = dataset.rasterband(1).map_err(|e| gdal_err(&context, e))?;
        band.set_no_data_value(Some(f64::NAN)).map_err(|e| gdal_err(&context, e))?;

        let samples: Vec<f32> = data.iter().copied().collect();
        let mut buffer = Buffer::new((grid.width, grid.height), samples);
        band.write((0, 0), (grid.width, grid.height), &mut buffer)
            .map_err(|e| gdal_err(&context, e))?;

        dataset.flush_cache().map_err(|e| gdal_err(&context, e))?;
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn WindowedRaster>> {
        let context = path.display().to_string();
        let dataset = Dataset::open(path).map_err(|e| gdal_err(&context, e))?;
        let grid = dataset_grid(&dataset, &context)?;
        Ok(Box::new(GdalWindowedRaster { dataset, grid, context }))
    }
}

/// Open GDAL dataset serving window reads
pub struct GdalWindowedRaster {
    dataset: Dataset,
    grid: Grid,
    context: String,
}

impl WindowedRaster for GdalWindowedRaster {
    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn read_window(&self, window: &Window) -> Result<Array2<f32>> {
        read_band_window(&self.dataset, window, &self.context)
    }
}
