//! Rasterizing zone polygons onto a pixel window

use canopy_core::models::Grid;
use geo::{BoundingRect, Contains, MultiPolygon, Point};
use ndarray::Array2;

/// `true` for pixels whose centre lies inside the polygon; holes excluded
pub fn polygon_mask(polygon: &MultiPolygon, grid: &Grid) -> Array2<bool> {
    let mut mask = Array2::from_elem(grid.shape(), false);
    let Some(rect) = polygon.bounding_rect() else {
        return mask;
    };

    for ((row, col), cell) in mask.indexed_iter_mut() {
        let (x, y) = grid.transform.pixel_center(col, row);
        if x < rect.min().x || x > rect.max().x || y < rect.min().y || y > rect.max().y {
            continue;
        }
        *cell = polygon.contains(&Point::new(x, y));
    }

    mask
}

/// Values under the mask that are finite
pub fn masked_values<'a>(
    data: &'a Array2<f32>,
    mask: &'a Array2<bool>,
) -> impl Iterator<Item = f64> + 'a {
    data.iter()
        .zip(mask.iter())
        .filter(|(v, m)| **m && v.is_finite())
        .map(|(v, _)| *v as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::models::GeoTransform;
    use geo::polygon;
    use ndarray::array;

    fn grid_4x4() -> Grid {
        Grid::new(32630, GeoTransform::new(0.0, 40.0, 10.0, -10.0), 4, 4)
    }

    #[test]
    fn test_centre_inside_rule() {
        // covers the centres of columns 0-1 and rows 0-1
        let poly = polygon![(x: 0.0, y: 20.0), (x: 21.0, y: 20.0), (x: 21.0, y: 40.0), (x: 0.0, y: 40.0)];
        let mask = polygon_mask(&MultiPolygon::new(vec![poly]), &grid_4x4());
        assert_eq!(mask.iter().filter(|m| **m).count(), 4);
        assert!(mask[[0, 0]] && mask[[1, 1]]);
        assert!(!mask[[2, 0]]);
    }

    #[test]
    fn test_hole_excluded() {
        let poly = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 40.0, y: 0.0), (x: 40.0, y: 40.0), (x: 0.0, y: 40.0)],
            interiors: [[(x: 10.0, y: 10.0), (x: 30.0, y: 10.0), (x: 30.0, y: 30.0), (x: 10.0, y: 30.0)]],
        );
        let mask = polygon_mask(&MultiPolygon::new(vec![poly]), &grid_4x4());
        assert_eq!(mask.iter().filter(|m| **m).count(), 12);
        assert!(!mask[[1, 1]] && !mask[[2, 2]]);
    }

    #[test]
    fn test_masked_values_skip_nan() {
        let data = array![[1.0, f32::NAN], [3.0, 4.0]];
        let mask = array![[true, true], [false, true]];
        let values: Vec<f64> = masked_values(&data, &mask).collect();
        assert_eq!(values, vec![1.0, 4.0]);
    }
}
