//! Canonical geometry types used across all canopy crates.
//!
//! These types bridge GeoJSON serialization and the computational `geo`
//! crate types used by `canopy-geo`.

use crate::error::{CanopyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// EPSG code of WGS 84 geographic coordinates
pub const EPSG_WGS84: u32 = 4326;

/// EPSG code of spherical Web Mercator
pub const EPSG_WEB_MERCATOR: u32 = 3857;

/// Coordinate Reference System identified by EPSG code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crs {
    pub epsg: u32,
    pub name: String,
}

impl Default for Crs {
    fn default() -> Self {
        Self::wgs84()
    }
}

impl Crs {
    pub fn new(epsg: u32, name: impl Into<String>) -> Self {
        Self { epsg, name: name.into() }
    }

    /// CRS known only by its code
    pub fn from_epsg(epsg: u32) -> Self {
        match epsg {
            EPSG_WGS84 => Self::wgs84(),
            EPSG_WEB_MERCATOR => Self::web_mercator(),
            _ => Self::new(epsg, format!("EPSG:{}", epsg)),
        }
    }

    /// WGS 84 (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::new(EPSG_WGS84, "WGS 84")
    }

    /// Web Mercator (EPSG:3857)
    pub fn web_mercator() -> Self {
        Self::new(EPSG_WEB_MERCATOR, "Web Mercator")
    }
}

/// Axis-aligned bounding box in the units of its CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Finite with a strictly positive span on both axes
    pub fn has_area(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y].iter().all(|v| v.is_finite())
            && self.width() > 0.0
            && self.height() > 0.0
    }

    /// Closed-interval overlap test
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Smallest box containing every finite point; `None` for an empty iterator
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut bbox: Option<BBox> = None;
        for (x, y) in points {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            bbox = Some(match bbox {
                None => BBox::new(x, y, x, y),
                Some(b) => BBox::new(b.min_x.min(x), b.min_y.min(y), b.max_x.max(x), b.max_y.max(y)),
            });
        }
        bbox
    }

    /// Sub-box covering `fraction` of each span, anchored at `anchor`
    pub fn sub_box(&self, fraction: f64, anchor: BBoxAnchor) -> Result<BBox> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(CanopyError::ConfigInvalid {
                key: "test_bbox_fraction".to_string(),
                reason: format!("must be in (0, 1], got {}", fraction),
            });
        }

        let w = self.width() * fraction;
        let h = self.height() * fraction;

        Ok(match anchor {
            BBoxAnchor::Center => {
                let cx = (self.min_x + self.max_x) / 2.0;
                let cy = (self.min_y + self.max_y) / 2.0;
                BBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
            }
            BBoxAnchor::SouthWest => {
                BBox::new(self.min_x, self.min_y, self.min_x + w, self.min_y + h)
            }
            BBoxAnchor::SouthEast => {
                BBox::new(self.max_x - w, self.min_y, self.max_x, self.min_y + h)
            }
            BBoxAnchor::NorthWest => {
                BBox::new(self.min_x, self.max_y - h, self.min_x + w, self.max_y)
            }
            BBoxAnchor::NorthEast => {
                BBox::new(self.max_x - w, self.max_y - h, self.max_x, self.max_y)
            }
        })
    }

    /// The box as a closed polygon ring
    pub fn to_geometry(&self) -> Geometry {
        Geometry::polygon(vec![vec![
            [self.min_x, self.min_y],
            [self.max_x, self.min_y],
            [self.max_x, self.max_y],
            [self.min_x, self.max_y],
            [self.min_x, self.min_y],
        ]])
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

/// Anchor point for a debug sub-box of the ROI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BBoxAnchor {
    #[default]
    Center,
    #[serde(rename = "sw")]
    SouthWest,
    #[serde(rename = "se")]
    SouthEast,
    #[serde(rename = "nw")]
    NorthWest,
    #[serde(rename = "ne")]
    NorthEast,
}

impl BBoxAnchor {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "center" | "centre" => Ok(BBoxAnchor::Center),
            "sw" => Ok(BBoxAnchor::SouthWest),
            "se" => Ok(BBoxAnchor::SouthEast),
            "nw" => Ok(BBoxAnchor::NorthWest),
            "ne" => Ok(BBoxAnchor::NorthEast),
            _ => Err(CanopyError::ConfigInvalid {
                key: "test_bbox_anchor".to_string(),
                reason: format!("Invalid anchor: {}. Use center, sw, se, nw, or ne", s),
            }),
        }
    }
}

/// GeoJSON-compatible geometry representation
///
/// This enum maps directly to GeoJSON geometry types with coordinate arrays.
/// It serializes as GeoJSON and converts to/from `geo` types in `canopy-geo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: [f64; 2],
    },
    LineString {
        coordinates: Vec<[f64; 2]>,
    },
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPoint {
        coordinates: Vec<[f64; 2]>,
    },
    MultiLineString {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
}

impl Geometry {
    /// Create a Point geometry
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point { coordinates: [x, y] }
    }

    /// Create a Polygon geometry
    pub fn polygon(rings: Vec<Vec<[f64; 2]>>) -> Self {
        Geometry::Polygon { coordinates: rings }
    }

    /// Create a MultiPolygon geometry
    pub fn multi_polygon(polygons: Vec<Vec<Vec<[f64; 2]>>>) -> Self {
        Geometry::MultiPolygon { coordinates: polygons }
    }

    /// Polygon or MultiPolygon
    pub fn is_polygonal(&self) -> bool {
        matches!(self, Geometry::Polygon { .. } | Geometry::MultiPolygon { .. })
    }

    /// Polygon rings of a polygonal geometry, one entry per polygon
    pub fn polygons(&self) -> Vec<Vec<Vec<[f64; 2]>>> {
        match self {
            Geometry::Polygon { coordinates } => vec![coordinates.clone()],
            Geometry::MultiPolygon { coordinates } => coordinates.clone(),
            _ => Vec::new(),
        }
    }

    /// Every vertex of the geometry
    pub fn coords(&self) -> Vec<[f64; 2]> {
        match self {
            Geometry::Point { coordinates } => vec![*coordinates],
            Geometry::LineString { coordinates } | Geometry::MultiPoint { coordinates } => {
                coordinates.clone()
            }
            Geometry::Polygon { coordinates } | Geometry::MultiLineString { coordinates } => {
                coordinates.iter().flatten().copied().collect()
            }
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().flatten().flatten().copied().collect()
            }
        }
    }

    /// Envelope of all vertices
    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_points(self.coords().into_iter().map(|c| (c[0], c[1])))
    }

    /// Parse GeoJSON geometry text
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CanopyError::InvalidGeometry {
            reason: format!("Failed to parse GeoJSON geometry: {}", e),
        })
    }

    /// Convert to serde_json::Value (GeoJSON)
    pub fn to_geojson(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Region of interest: a polygonal geometry with its CRS
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    pub geometry: Geometry,
    pub crs: Crs,
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.geometry.polygons().len();
        write!(f, "{} polygon(s) in EPSG:{}", parts, self.crs.epsg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polygon_serialization() {
        let polygon = Geometry::polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]);
        let json = serde_json::to_string(&polygon).unwrap();
        assert!(json.contains("Polygon"));

        let parsed: Geometry = serde_json::from_str(&json).unwrap();
        assert_eq!(polygon, parsed);
    }

    #[test]
    fn test_parse_postgis_geojson() {
        let text = r#"{"type":"MultiPolygon","coordinates":[[[[0,0],[2,0],[2,1],[0,0]]]]}"#;
        let geom = Geometry::from_geojson_str(text).unwrap();
        assert!(geom.is_polygonal());
        assert_eq!(geom.bbox(), Some(BBox::new(0.0, 0.0, 2.0, 1.0)));
    }

    #[test]
    fn test_parse_garbage_geojson() {
        let err = Geometry::from_geojson_str("{\"type\":\"Blob\"}").unwrap_err();
        assert!(matches!(err, CanopyError::InvalidGeometry { .. }));
    }

    #[test]
    fn test_bbox_has_area() {
        assert!(BBox::new(-4.0, 41.0, -3.9, 41.1).has_area());
        assert!(!BBox::new(1.0, 1.0, 1.0, 2.0).has_area());
        assert!(!BBox::new(f64::NAN, 0.0, 1.0, 1.0).has_area());
    }

    #[test]
    fn test_sub_box_anchors() {
        let roi = BBox::new(0.0, 0.0, 10.0, 20.0);

        let center = roi.sub_box(0.5, BBoxAnchor::Center).unwrap();
        assert_eq!(center, BBox::new(2.5, 5.0, 7.5, 15.0));

        let ne = roi.sub_box(0.1, BBoxAnchor::NorthEast).unwrap();
        assert!((ne.min_x - 9.0).abs() < 1e-12);
        assert!((ne.min_y - 18.0).abs() < 1e-12);
        assert_eq!(ne.max_x, 10.0);

        assert!(roi.sub_box(0.0, BBoxAnchor::Center).is_err());
        assert!(roi.sub_box(1.5, BBoxAnchor::Center).is_err());
    }

    #[test]
    fn test_anchor_parse() {
        assert_eq!(BBoxAnchor::parse("SW").unwrap(), BBoxAnchor::SouthWest);
        assert!(BBoxAnchor::parse("middle").is_err());
    }

    #[test]
    fn test_crs_from_epsg() {
        assert_eq!(Crs::from_epsg(4326), Crs::wgs84());
        assert_eq!(Crs::from_epsg(32630).name, "EPSG:32630");
    }
}
