//! CRS transformation through PROJ

use crate::models::{BBox, Crs, Geometry};
use canopy_core::error::{CanopyError, Result};
use proj::Proj;

/// Points per bounding-box edge when projecting bounds
pub const DENSIFY_POINTS: usize = 21;

/// Check if two CRS are the same
pub fn crs_match(crs1: &Crs, crs2: &Crs) -> bool {
    crs1.epsg == crs2.epsg
}

/// Coordinate transformer between two EPSG codes.
///
/// Identical codes short-circuit to the identity without touching PROJ.
/// Axis order is always `(x, y)` / `(lon, lat)`.
pub struct CoordTransformer {
    from: u32,
    to: u32,
    proj: Option<Proj>,
}

impl CoordTransformer {
    pub fn new(from: u32, to: u32) -> Result<Self> {
        if from == to {
            return Ok(Self { from, to, proj: None });
        }

        let from_def = format!("EPSG:{}", from);
        let to_def = format!("EPSG:{}", to);
        let proj = Proj::new_known_crs(&from_def, &to_def, None).map_err(|e| {
            CanopyError::Projection {
                from,
                to,
                reason: format!("Failed to create projection: {}", e),
            }
        })?;

        Ok(Self { from, to, proj: Some(proj) })
    }

    pub fn from_epsg(&self) -> u32 {
        self.from
    }

    pub fn to_epsg(&self) -> u32 {
        self.to
    }

    pub fn is_identity(&self) -> bool {
        self.proj.is_none()
    }

    /// Transform a single coordinate
    pub fn convert(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some(proj) = &self.proj else {
            return Ok((x, y));
        };
        let (tx, ty) = proj.convert((x, y)).map_err(|e| self.error(e))?;
        if !tx.is_finite() || !ty.is_finite() {
            return Err(self.error(format!("non-finite result for ({}, {})", x, y)));
        }
        Ok((tx, ty))
    }

    /// Transform coordinates in place
    pub fn convert_points(&self, points: &mut [(f64, f64)]) -> Result<()> {
        if let Some(proj) = &self.proj {
            proj.convert_array(points).map_err(|e| self.error(e))?;
        }
        Ok(())
    }

    fn error(&self, reason: impl std::fmt::Display) -> CanopyError {
        CanopyError::Projection { from: self.from, to: self.to, reason: reason.to_string() }
    }
}

impl std::fmt::Debug for CoordTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordTransformer").field("from", &self.from).field("to", &self.to).finish()
    }
}

fn convert_ring(t: &CoordTransformer, ring: &[[f64; 2]]) -> Result<Vec<[f64; 2]>> {
    ring.iter()
        .map(|c| t.convert(c[0], c[1]).map(|(x, y)| [x, y]))
        .collect()
}

fn convert_rings(t: &CoordTransformer, rings: &[Vec<[f64; 2]>]) -> Result<Vec<Vec<[f64; 2]>>> {
    rings.iter().map(|r| convert_ring(t, r)).collect()
}

/// Reproject a geometry with an existing transformer
pub fn transform_geometry(geometry: &Geometry, t: &CoordTransformer) -> Result<Geometry> {
    if t.is_identity() {
        return Ok(geometry.clone());
    }

    Ok(match geometry {
        Geometry::Point { coordinates } => {
            let (x, y) = t.convert(coordinates[0], coordinates[1])?;
            Geometry::point(x, y)
        }
        Geometry::LineString { coordinates } => {
            Geometry::LineString { coordinates: convert_ring(t, coordinates)? }
        }
        Geometry::MultiPoint { coordinates } => {
            Geometry::MultiPoint { coordinates: convert_ring(t, coordinates)? }
        }
        Geometry::Polygon { coordinates } => Geometry::polygon(convert_rings(t, coordinates)?),
        Geometry::MultiLineString { coordinates } => {
            Geometry::MultiLineString { coordinates: convert_rings(t, coordinates)? }
        }
        Geometry::MultiPolygon { coordinates } => Geometry::multi_polygon(
            coordinates.iter().map(|p| convert_rings(t, p)).collect::<Result<_>>()?,
        ),
    })
}

/// Reproject a geometry from one CRS to another
pub fn reproject_geometry(geometry: &Geometry, from_crs: &Crs, to_crs: &Crs) -> Result<Geometry> {
    if crs_match(from_crs, to_crs) {
        return Ok(geometry.clone());
    }
    let t = CoordTransformer::new(from_crs.epsg, to_crs.epsg)?;
    transform_geometry(geometry, &t)
}

/// Project a bounding box, densifying each edge with `densify` points and
/// taking the envelope of the transformed points.
pub fn transform_bounds(bbox: &BBox, t: &CoordTransformer, densify: usize) -> Result<BBox> {
    if t.is_identity() {
        return Ok(*bbox);
    }

    let n = densify.max(2);
    let mut points = Vec::with_capacity(4 * n);
    for i in 0..n {
        let f = i as f64 / (n - 1) as f64;
        let x = bbox.min_x + f * bbox.width();
        let y = bbox.min_y + f * bbox.height();
        points.push((x, bbox.min_y));
        points.push((x, bbox.max_y));
        points.push((bbox.min_x, y));
        points.push((bbox.max_x, y));
    }

    t.convert_points(&mut points)?;

    BBox::from_points(points).ok_or_else(|| CanopyError::Projection {
        from: t.from_epsg(),
        to: t.to_epsg(),
        reason: "no finite points after projecting bounds".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let t = CoordTransformer::new(32630, 32630).unwrap();
        assert!(t.is_identity());
        assert_eq!(t.convert(500_000.0, 4_500_000.0).unwrap(), (500_000.0, 4_500_000.0));

        let bbox = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(transform_bounds(&bbox, &t, DENSIFY_POINTS).unwrap(), bbox);
    }

    #[test]
    fn test_web_mercator_origin() {
        let t = CoordTransformer::new(4326, 3857).unwrap();
        let (x, y) = t.convert(0.0, 0.0).unwrap();
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);

        let (x, _) = t.convert(180.0, 0.0).unwrap();
        assert!((x - 20_037_508.342789244).abs() < 1e-3);
    }

    #[test]
    fn test_utm_bounds_are_metric() {
        let t = CoordTransformer::new(4326, 32630).unwrap();
        let bbox = BBox::new(-4.0, 41.0, -3.9, 41.1);
        let projected = transform_bounds(&bbox, &t, DENSIFY_POINTS).unwrap();

        // ~0.1 degree is roughly 8-11 km at this latitude
        assert!(projected.width() > 8_000.0 && projected.width() < 9_000.0);
        assert!(projected.height() > 11_000.0 && projected.height() < 11_300.0);
    }

    #[test]
    fn test_reproject_polygon_keeps_ring_count() {
        let geom = Geometry::polygon(vec![
            vec![[-4.0, 41.0], [-3.9, 41.0], [-3.9, 41.1], [-4.0, 41.1], [-4.0, 41.0]],
            vec![[-3.96, 41.04], [-3.94, 41.04], [-3.94, 41.06], [-3.96, 41.04]],
        ]);
        let projected = reproject_geometry(&geom, &Crs::wgs84(), &Crs::from_epsg(32630)).unwrap();
        let rings = &projected.polygons()[0];
        assert_eq!(rings.len(), 2);
        assert!(rings[0][0][0] > 100_000.0);
    }

    #[test]
    fn test_unknown_epsg_is_projection_error() {
        let err = CoordTransformer::new(4326, 999_999).unwrap_err();
        assert!(matches!(err, CanopyError::Projection { .. }));
    }
}
