//! Destination grid derivation.
//!
//! The native grid covers the projected ROI envelope at the target
//! resolution; the web grid covers the same area in Web Mercator with
//! square pixels sized by the diagonal rule.

use crate::models::BBox;
use crate::transform::{transform_bounds, CoordTransformer, DENSIFY_POINTS};
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::geometry::{EPSG_WEB_MERCATOR, EPSG_WGS84};
use canopy_core::models::{GeoTransform, Grid};

/// Parameters of the native grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub resolution_m: f64,
    pub max_dim: usize,
    pub dst_epsg: u32,
}

/// Pixel dimensions for `span / res`, scaled down proportionally so neither
/// side exceeds `max_dim`
pub fn capped_dimensions(span_x: f64, span_y: f64, res: f64, max_dim: usize) -> (usize, usize) {
    let width = (span_x / res).ceil().max(1.0);
    let height = (span_y / res).ceil().max(1.0);

    let max_dim = max_dim.max(1) as f64;
    let scale = (width / max_dim).max(height / max_dim).max(1.0);

    let cap = |v: f64| ((v / scale).ceil() as usize).min(max_dim as usize);
    (cap(width), cap(height))
}

fn require_area(bounds: &BBox, what: &str) -> Result<()> {
    if bounds.has_area() {
        Ok(())
    } else {
        Err(CanopyError::InvalidGeometry {
            reason: format!(
                "{} has a non-positive span ({} x {})",
                what,
                bounds.width(),
                bounds.height()
            ),
        })
    }
}

/// Build the native grid from a WGS 84 bounding box
pub fn build_grid(bbox_4326: &BBox, spec: &GridSpec) -> Result<Grid> {
    if !(spec.resolution_m.is_finite() && spec.resolution_m > 0.0) {
        return Err(CanopyError::ConfigInvalid {
            key: "resolution_m".to_string(),
            reason: format!("must be positive, got {}", spec.resolution_m),
        });
    }

    let transformer = CoordTransformer::new(EPSG_WGS84, spec.dst_epsg)?;
    let projected = transform_bounds(bbox_4326, &transformer, DENSIFY_POINTS)?;
    require_area(&projected, "projected bounding box")?;

    let (width, height) = capped_dimensions(
        projected.width(),
        projected.height(),
        spec.resolution_m,
        spec.max_dim,
    );

    let grid = Grid::new(
        spec.dst_epsg,
        GeoTransform::from_bounds(&projected, width, height),
        width,
        height,
    );

    tracing::debug!(
        epsg = spec.dst_epsg,
        width,
        height,
        pixel_width = grid.transform.pixel_width,
        "Built destination grid"
    );

    Ok(grid)
}

/// Web Mercator grid covering `native`.
///
/// The pixel size keeps the number of pixels along the diagonal equal to the
/// source diagonal, then the same `max_dim` cap applies.
pub fn build_web_grid(native: &Grid, max_dim: usize) -> Result<Grid> {
    let transformer = CoordTransformer::new(native.epsg, EPSG_WEB_MERCATOR)?;
    let bounds = transform_bounds(&native.bounds(), &transformer, DENSIFY_POINTS)?;
    require_area(&bounds, "web mercator bounds")?;

    let src_diag = ((native.width.pow(2) + native.height.pow(2)) as f64).sqrt();
    let dst_diag = (bounds.width().powi(2) + bounds.height().powi(2)).sqrt();
    let res = dst_diag / src_diag;

    let (width, height) = capped_dimensions(bounds.width(), bounds.height(), res, max_dim);

    Ok(Grid::new(
        EPSG_WEB_MERCATOR,
        GeoTransform::from_bounds(&bounds, width, height),
        width,
        height,
    ))
}

/// Outer bounds of a grid expressed in another CRS
pub fn grid_bounds_in(grid: &Grid, epsg: u32) -> Result<BBox> {
    let transformer = CoordTransformer::new(grid.epsg, epsg)?;
    transform_bounds(&grid.bounds(), &transformer, DENSIFY_POINTS)
}
