//! Raster and catalog backends selected at build time

use anyhow::{Context, Result};
use canopy_catalog::{SceneCatalog, StacClientOptions, StacSceneCatalog};
use canopy_core::config::PipelineSettings;
use canopy_raster::RasterIo;
use std::sync::Arc;

/// Raster backend for band reads and GeoTIFF writes
#[cfg(feature = "gdal")]
pub fn raster_backend() -> Result<Arc<dyn RasterIo>> {
    let io = canopy_raster::gdal_io::GdalRasterIo::new().context("Failed to configure GDAL")?;
    Ok(Arc::new(io))
}

/// Raster backend for band reads and GeoTIFF writes
#[cfg(not(feature = "gdal"))]
pub fn raster_backend() -> Result<Arc<dyn RasterIo>> {
    anyhow::bail!(
        "No raster backend available\n\n\
        This build of canopy cannot read Cloud-Optimized GeoTIFFs.\n\
        Rebuild with GDAL support: cargo build --release --features gdal"
    )
}

/// STAC catalog for the configured API root
pub fn scene_catalog(settings: &PipelineSettings) -> Result<Arc<dyn SceneCatalog>> {
    let options = StacClientOptions {
        max_items: settings.fetch_limit,
        ..Default::default()
    };
    let catalog = StacSceneCatalog::new(&settings.stac_url, options)
        .with_context(|| format!("Failed to create STAC client for {}", settings.stac_url))?;
    tracing::debug!(root = catalog.catalog().root_url(), "Using STAC catalog");
    Ok(Arc::new(catalog))
}
