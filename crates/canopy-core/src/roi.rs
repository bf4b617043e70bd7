//! Region-of-interest loading from GeoJSON.

use crate::error::{CanopyError, Result};
use crate::models::geometry::EPSG_WGS84;
use crate::models::{Crs, Geometry, Roi};
use std::fs;
use std::path::Path;

/// Load the ROI from a GeoJSON file.
///
/// Accepts a FeatureCollection, a single Feature, or a bare Geometry. All
/// polygonal parts are merged into one MultiPolygon. The CRS comes from a
/// legacy `crs` member when present and defaults to WGS 84.
pub fn load_roi(path: &Path) -> Result<Roi> {
    let invalid = |reason: String| CanopyError::InvalidRoi { path: path.to_path_buf(), reason };

    if !path.exists() {
        return Err(invalid("file does not exist".to_string()));
    }

    let text = fs::read_to_string(path)?;
    let geojson: geojson::GeoJson =
        text.parse().map_err(|e| invalid(format!("Failed to parse GeoJSON: {}", e)))?;

    let (geometries, epsg) = match &geojson {
        geojson::GeoJson::FeatureCollection(fc) => {
            let geometries = fc.features.iter().filter_map(|f| f.geometry.as_ref()).collect();
            let epsg = fc
                .foreign_members
                .as_ref()
                .and_then(|fm| fm.get("crs"))
                .and_then(extract_epsg_from_crs);
            (geometries, epsg)
        }
        geojson::GeoJson::Feature(feature) => {
            let epsg = feature
                .foreign_members
                .as_ref()
                .and_then(|fm| fm.get("crs"))
                .and_then(extract_epsg_from_crs);
            (feature.geometry.iter().collect(), epsg)
        }
        geojson::GeoJson::Geometry(geom) => (vec![geom], None),
    };

    let mut polygons = Vec::new();
    for geom in geometries {
        let value = serde_json::to_value(geom)?;
        let parsed: Geometry = serde_json::from_value(value)
            .map_err(|e| invalid(format!("Unsupported geometry: {}", e)))?;
        polygons.extend(parsed.polygons());
    }

    polygons.retain(|rings| rings.first().is_some_and(|ring| ring.len() >= 4));
    if polygons.is_empty() {
        return Err(invalid("no polygonal geometry found".to_string()));
    }

    let roi = Roi {
        geometry: Geometry::multi_polygon(polygons),
        crs: Crs::from_epsg(epsg.unwrap_or(EPSG_WGS84)),
    };
    tracing::debug!(path = %path.display(), roi = %roi, "Loaded region of interest");
    Ok(roi)
}

/// Extract EPSG code from a legacy GeoJSON `crs` object
fn extract_epsg_from_crs(crs: &serde_json::Value) -> Option<u32> {
    // "EPSG:25830" or "urn:ogc:def:crs:EPSG::25830"; CRS84 is lon/lat WGS 84
    let name = crs.get("properties")?.get("name")?.as_str()?;
    if name.ends_with("CRS84") {
        return Some(EPSG_WGS84);
    }
    name.split(':').next_back()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_load_feature_collection_with_crs() {
        let file = write_temp(
            r#"{
  "type": "FeatureCollection",
  "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::25830"}},
  "features": [
    {"type": "Feature", "properties": {},
     "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,0]]]}},
    {"type": "Feature", "properties": {},
     "geometry": {"type": "Polygon", "coordinates": [[[20,20],[30,20],[30,30],[20,20]]]}}
  ]
}"#,
        );

        let roi = load_roi(file.path()).unwrap();
        assert_eq!(roi.crs.epsg, 25830);
        assert_eq!(roi.geometry.polygons().len(), 2);
        assert_eq!(roi.geometry.bbox().unwrap().max_x, 30.0);
    }

    #[test]
    fn test_load_bare_geometry_defaults_to_wgs84() {
        let file = write_temp(
            r#"{"type": "Polygon", "coordinates": [[[-4.0,41.0],[-3.9,41.0],[-3.9,41.1],[-4.0,41.0]]]}"#,
        );
        let roi = load_roi(file.path()).unwrap();
        assert_eq!(roi.crs, Crs::wgs84());
    }

    #[test]
    fn test_point_only_is_rejected() {
        let file = write_temp(r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#);
        let err = load_roi(file.path()).unwrap_err();
        assert!(matches!(err, CanopyError::InvalidRoi { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = load_roi(Path::new("/nonexistent/roi.geojson")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_crs84_name() {
        let crs = serde_json::json!({
            "type": "name",
            "properties": {"name": "urn:ogc:def:crs:OGC:1.3:CRS84"}
        });
        assert_eq!(extract_epsg_from_crs(&crs), Some(4326));
    }
}
