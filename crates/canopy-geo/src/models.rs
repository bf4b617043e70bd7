//! Geometry models for canopy-geo.
//!
//! Re-exports the canonical types from `canopy-core` and converts them to
//! the `geo` crate types used for predicates.

use geo::{Coord, LineString, MultiPolygon, Polygon};

pub use canopy_core::models::{BBox, Crs, Geometry};

fn ring(coords: &[[f64; 2]]) -> LineString {
    LineString::new(coords.iter().map(|c| Coord { x: c[0], y: c[1] }).collect())
}

fn polygon(rings: &[Vec<[f64; 2]>]) -> Polygon {
    match rings.split_first() {
        Some((exterior, interiors)) => {
            Polygon::new(ring(exterior), interiors.iter().map(|r| ring(r)).collect())
        }
        None => Polygon::new(LineString::new(vec![]), vec![]),
    }
}

/// Convert a canonical Geometry to a geo::Geometry
pub fn to_geo_geometry(geom: &Geometry) -> geo::Geometry {
    match geom {
        Geometry::Point { coordinates } => {
            geo::Geometry::Point(geo::Point::new(coordinates[0], coordinates[1]))
        }
        Geometry::LineString { coordinates } => geo::Geometry::LineString(ring(coordinates)),
        Geometry::Polygon { coordinates } => geo::Geometry::Polygon(polygon(coordinates)),
        Geometry::MultiPoint { coordinates } => geo::Geometry::MultiPoint(geo::MultiPoint::new(
            coordinates.iter().map(|c| geo::Point::new(c[0], c[1])).collect(),
        )),
        Geometry::MultiLineString { coordinates } => geo::Geometry::MultiLineString(
            geo::MultiLineString::new(coordinates.iter().map(|l| ring(l)).collect()),
        ),
        Geometry::MultiPolygon { coordinates } => geo::Geometry::MultiPolygon(MultiPolygon::new(
            coordinates.iter().map(|p| polygon(p)).collect(),
        )),
    }
}

/// Polygonal geometry as a `geo::MultiPolygon`; `None` for other types
pub fn to_multi_polygon(geom: &Geometry) -> Option<MultiPolygon> {
    match geom {
        Geometry::Polygon { coordinates } => Some(MultiPolygon::new(vec![polygon(coordinates)])),
        Geometry::MultiPolygon { coordinates } => {
            Some(MultiPolygon::new(coordinates.iter().map(|p| polygon(p)).collect()))
        }
        _ => None,
    }
}

/// Extension trait for Geometry with geo-crate operations
pub trait GeometryExt {
    /// Convert to geo::Geometry
    fn to_geo(&self) -> geo::Geometry;

    /// Area in squared CRS units; zero for non-polygonal geometries
    fn planar_area(&self) -> f64;
}

impl GeometryExt for Geometry {
    fn to_geo(&self) -> geo::Geometry {
        to_geo_geometry(self)
    }

    fn planar_area(&self) -> f64 {
        use geo::Area;
        to_multi_polygon(self).map(|mp| mp.unsigned_area()).unwrap_or(0.0)
    }
}
