//! Geometry validation for zones and regions of interest

use crate::models::Geometry;
use canopy_core::error::{CanopyError, Result};

/// Validation result with details
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

/// Validation error with location details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub location: String,
    pub reason: String,
}

impl ValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        Self { is_valid: true, errors: Vec::new() }
    }

    /// Add an error to the result
    pub fn add_error(&mut self, location: String, reason: String) {
        self.is_valid = false;
        self.errors.push(ValidationError { location, reason });
    }

    /// Convert into a `Result`, reporting the first error
    pub fn into_result(self) -> Result<()> {
        match self.errors.into_iter().next() {
            None => Ok(()),
            Some(error) => Err(CanopyError::InvalidGeometry {
                reason: format!("{}: {}", error.location, error.reason),
            }),
        }
    }
}

/// Validate a geometry that is used as an aggregation zone.
///
/// Zones must be polygonal, with finite coordinates and closed rings of at
/// least four points.
pub fn validate_zone(geometry: &Geometry) -> ValidationResult {
    let mut result = ValidationResult::valid();

    let polygons = match geometry {
        Geometry::Polygon { coordinates } => vec![coordinates.as_slice()],
        Geometry::MultiPolygon { coordinates } => {
            if coordinates.is_empty() {
                result.add_error("MultiPolygon".to_string(), "no polygons".to_string());
            }
            coordinates.iter().map(Vec::as_slice).collect()
        }
        _ => {
            result.add_error(
                "Geometry".to_string(),
                "zone geometry must be a Polygon or MultiPolygon".to_string(),
            );
            return result;
        }
    };

    for (i, rings) in polygons.into_iter().enumerate() {
        validate_polygon(rings, &format!("Polygon[{}]", i), &mut result);
    }

    result
}

fn validate_polygon(rings: &[Vec<[f64; 2]>], location: &str, result: &mut ValidationResult) {
    if rings.is_empty() {
        result.add_error(location.to_string(), "polygon has no exterior ring".to_string());
        return;
    }

    for (i, ring) in rings.iter().enumerate() {
        let ring_location =
            if i == 0 { format!("{} exterior", location) } else { format!("{} interior[{}]", location, i - 1) };

        if ring.len() < 4 {
            result.add_error(
                ring_location.clone(),
                format!("ring must have at least 4 points, found {}", ring.len()),
            );
        }

        if ring.iter().any(|c| !c[0].is_finite() || !c[1].is_finite()) {
            result.add_error(ring_location.clone(), "Coordinates must be finite".to_string());
        }

        if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
            if first != last {
                result.add_error(
                    ring_location,
                    "ring must be closed (first point == last point)".to_string(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_polygon() {
        let geom = Geometry::polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]);
        assert!(validate_zone(&geom).is_valid);
    }

    #[test]
    fn test_open_ring() {
        let geom = Geometry::polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]]);
        let result = validate_zone(&geom);
        assert!(!result.is_valid);
        assert!(result.errors[0].reason.contains("closed"));
    }

    #[test]
    fn test_non_finite_in_multipolygon() {
        let geom = Geometry::multi_polygon(vec![vec![vec![
            [0.0, 0.0],
            [f64::NAN, 0.0],
            [1.0, 1.0],
            [0.0, 0.0],
        ]]]);
        let err = validate_zone(&geom).into_result().unwrap_err();
        assert!(err.to_string().contains("finite"));
    }

    #[test]
    fn test_line_is_not_a_zone() {
        let geom = Geometry::LineString { coordinates: vec![[0.0, 0.0], [1.0, 1.0]] };
        assert!(!validate_zone(&geom).is_valid);
    }
}
