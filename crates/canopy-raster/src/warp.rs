//! Pure-Rust warping of a georeferenced array onto another grid.
//!
//! Destination pixel centres are projected into the source CRS one row at a
//! time and sampled there. Bilinear sampling ignores `NaN` neighbours and
//! renormalises the remaining weights.

use crate::io::{Resampling, SourceRaster};
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::Grid;
use canopy_geo::transform::CoordTransformer;
use ndarray::Array2;

/// Warp `src` onto `dst`; pixels outside the source are `NaN`
pub fn warp(src: &SourceRaster, dst: &Grid, resampling: Resampling) -> Result<Array2<f32>> {
    let (src_rows, src_cols) = src.data.dim();
    if (src_rows, src_cols) != src.grid.shape() {
        return Err(CanopyError::Raster(format!(
            "source array shape {:?} does not match its grid {:?}",
            src.data.dim(),
            src.grid.shape()
        )));
    }

    let transformer = CoordTransformer::new(dst.epsg, src.grid.epsg)?;
    let mut out = Array2::<f32>::from_elem(dst.shape(), f32::NAN);
    let mut centres = Vec::with_capacity(dst.width);

    for row in 0..dst.height {
        centres.clear();
        centres.extend((0..dst.width).map(|col| dst.transform.pixel_center(col, row)));
        transformer.convert_points(&mut centres)?;

        for (col, &(x, y)) in centres.iter().enumerate() {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            let (fc, fr) = src.grid.transform.geo_to_pixel(x, y);
            out[[row, col]] = match resampling {
                Resampling::Nearest => sample_nearest(src, fc, fr),
                Resampling::Bilinear => sample_bilinear(src, fc, fr),
            };
        }
    }

    Ok(out)
}

fn inside(src: &SourceRaster, fc: f64, fr: f64) -> bool {
    fc >= 0.0 && fr >= 0.0 && fc < src.grid.width as f64 && fr < src.grid.height as f64
}

fn sample_nearest(src: &SourceRaster, fc: f64, fr: f64) -> f32 {
    if !inside(src, fc, fr) {
        return f32::NAN;
    }
    src.data[[fr.floor() as usize, fc.floor() as usize]]
}

fn sample_bilinear(src: &SourceRaster, fc: f64, fr: f64) -> f32 {
    if !inside(src, fc, fr) {
        return f32::NAN;
    }

    // Kernel is centred on pixel centres, which sit at half-integer offsets
    let x = fc - 0.5;
    let y = fr - 0.5;
    let x0 = x.floor();
    let y0 = y.floor();
    let dx = x - x0;
    let dy = y - y0;

    let taps = [
        (x0, y0, (1.0 - dx) * (1.0 - dy)),
        (x0 + 1.0, y0, dx * (1.0 - dy)),
        (x0, y0 + 1.0, (1.0 - dx) * dy),
        (x0 + 1.0, y0 + 1.0, dx * dy),
    ];

    let mut sum = 0.0f64;
    let mut weight = 0.0f64;
    for (c, r, w) in taps {
        if w <= 0.0 || c < 0.0 || r < 0.0 {
            continue;
        }
        let (c, r) = (c as usize, r as usize);
        if c >= src.grid.width || r >= src.grid.height {
            continue;
        }
        let v = src.data[[r, c]];
        if v.is_finite() {
            sum += v as f64 * w;
            weight += w;
        }
    }

    if weight > 0.0 {
        (sum / weight) as f32
    } else {
        f32::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::models::GeoTransform;
    use ndarray::array;

    fn source(data: Array2<f32>) -> SourceRaster {
        let (rows, cols) = data.dim();
        SourceRaster::new(
            Grid::new(32630, GeoTransform::new(0.0, 40.0, 10.0, -10.0), cols, rows),
            data,
        )
    }

    #[test]
    fn test_same_grid_is_identity() {
        let src = source(array![[1.0, 2.0], [3.0, 4.0]]);
        let out = warp(&src, &src.grid, Resampling::Bilinear).unwrap();
        assert_eq!(out, src.data);
        let out = warp(&src, &src.grid, Resampling::Nearest).unwrap();
        assert_eq!(out, src.data);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let src = source(array![[0.0, 10.0], [0.0, 10.0]]);
        // single destination pixel centred on the source's middle column edge
        let dst = Grid::new(32630, GeoTransform::new(5.0, 30.0, 10.0, -10.0), 1, 1);
        let out = warp(&src, &dst, Resampling::Bilinear).unwrap();
        assert!((out[[0, 0]] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_bilinear_renormalises_around_nan() {
        let src = source(array![[f32::NAN, 10.0], [f32::NAN, 10.0]]);
        let dst = Grid::new(32630, GeoTransform::new(5.0, 30.0, 10.0, -10.0), 1, 1);
        let out = warp(&src, &dst, Resampling::Bilinear).unwrap();
        assert_eq!(out[[0, 0]], 10.0);
    }

    #[test]
    fn test_all_nan_neighbours_stay_nan() {
        let src = source(Array2::from_elem((2, 2), f32::NAN));
        let out = warp(&src, &src.grid, Resampling::Bilinear).unwrap();
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_outside_source_is_nan() {
        let src = source(array![[1.0, 2.0], [3.0, 4.0]]);
        let dst = Grid::new(32630, GeoTransform::new(10.0, 30.0, 10.0, -10.0), 3, 1);
        let out = warp(&src, &dst, Resampling::Nearest).unwrap();
        assert_eq!(out[[0, 0]], 4.0);
        assert!(out[[0, 1]].is_nan());
        assert!(out[[0, 2]].is_nan());
    }

    #[test]
    fn test_nearest_upsample() {
        let src = source(array![[7.0, 8.0], [9.0, 6.0]]);
        let dst = Grid::new(32630, GeoTransform::new(0.0, 40.0, 5.0, -5.0), 4, 4);
        let out = warp(&src, &dst, Resampling::Nearest).unwrap();
        assert_eq!(out[[0, 0]], 7.0);
        assert_eq!(out[[1, 1]], 7.0);
        assert_eq!(out[[0, 3]], 8.0);
        assert_eq!(out[[3, 3]], 6.0);
    }
}
