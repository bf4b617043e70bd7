//! Scene quality masking and vegetation index computation

use canopy_core::error::{CanopyError, Result};
use canopy_core::models::quality::CLOUD_CLASSES;
use canopy_core::models::InvalidClasses;
use ndarray::{Array2, Zip};

/// Digital numbers per unit reflectance
pub const REFLECTANCE_SCALE: f32 = 10_000.0;

/// Scale raw digital numbers to reflectance; values outside
/// `[0, REFLECTANCE_SCALE]` become `NaN`
pub fn to_reflectance(raw: &Array2<f32>) -> Array2<f32> {
    raw.mapv(|v| {
        if (0.0..=REFLECTANCE_SCALE).contains(&v) {
            v / REFLECTANCE_SCALE
        } else {
            f32::NAN
        }
    })
}

/// Integer class code of a classification pixel; nodata maps to class 0
pub fn class_code(v: f32) -> u8 {
    if v.is_finite() {
        // float-to-int casts saturate
        v.round() as u8
    } else {
        0
    }
}

/// Grow `mask` by one pixel in all eight directions, `iterations` times
pub fn dilate(mask: &Array2<bool>, iterations: usize) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let mut current = mask.clone();

    for _ in 0..iterations {
        let mut next = current.clone();
        for ((r, c), &set) in current.indexed_iter() {
            if !set {
                continue;
            }
            for nr in r.saturating_sub(1)..=(r + 1).min(rows.saturating_sub(1)) {
                for nc in c.saturating_sub(1)..=(c + 1).min(cols.saturating_sub(1)) {
                    next[[nr, nc]] = true;
                }
            }
        }
        current = next;
    }

    current
}

/// Masks scenes by their classification band and computes NDVI
#[derive(Debug, Clone)]
pub struct QualityMasker {
    invalid: InvalidClasses,
    cloud_buffer_px: usize,
}

impl QualityMasker {
    pub fn new(invalid: InvalidClasses, cloud_buffer_px: usize) -> Self {
        Self { invalid, cloud_buffer_px }
    }

    /// `true` where the pixel must be discarded
    pub fn invalid_mask(&self, classification: &Array2<f32>) -> Array2<bool> {
        let mut mask = classification.mapv(|v| self.invalid.contains(class_code(v)));

        if self.cloud_buffer_px > 0 {
            let clouds = classification.mapv(|v| CLOUD_CLASSES.contains(&class_code(v)));
            let buffered = dilate(&clouds, self.cloud_buffer_px);
            Zip::from(&mut mask).and(&buffered).for_each(|m, &b| *m |= b);
        }

        mask
    }

    /// Reflectance-scale both bands, mask them, and compute NDVI.
    ///
    /// Without a classification band the scene is left unmasked.
    pub fn index(
        &self,
        red_raw: &Array2<f32>,
        nir_raw: &Array2<f32>,
        classification: Option<&Array2<f32>>,
    ) -> Result<Array2<f32>> {
        check_shape("nir", red_raw, nir_raw)?;

        let mut red = to_reflectance(red_raw);
        let mut nir = to_reflectance(nir_raw);

        if let Some(classification) = classification {
            check_shape("classification", red_raw, classification)?;
            let mask = self.invalid_mask(classification);
            Zip::from(&mut red).and(&mut nir).and(&mask).for_each(|r, n, &masked| {
                if masked {
                    *r = f32::NAN;
                    *n = f32::NAN;
                }
            });
        }

        Ok(ndvi(&red, &nir))
    }
}

fn check_shape(name: &str, reference: &Array2<f32>, other: &Array2<f32>) -> Result<()> {
    if reference.dim() == other.dim() {
        Ok(())
    } else {
        Err(CanopyError::Raster(format!(
            "{} band shape {:?} differs from red band shape {:?}",
            name,
            other.dim(),
            reference.dim()
        )))
    }
}

/// `(nir - red) / (nir + red)`, `NaN` where the denominator is zero
pub fn ndvi(red: &Array2<f32>, nir: &Array2<f32>) -> Array2<f32> {
    Zip::from(red).and(nir).map_collect(|&r, &n| {
        let den = n + r;
        if den == 0.0 {
            f32::NAN
        } else {
            (n - r) / den
        }
    })
}

/// Fraction of finite pixels; zero for an empty array
pub fn valid_fraction(data: &Array2<f32>) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().filter(|v| v.is_finite()).count() as f64 / data.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_reflectance_range() {
        let out = to_reflectance(&array![[0.0, 5000.0, 10000.0, 10001.0, -1.0]]);
        assert_eq!(out[[0, 0]], 0.0);
        assert_eq!(out[[0, 1]], 0.5);
        assert_eq!(out[[0, 2]], 1.0);
        assert!(out[[0, 3]].is_nan());
        assert!(out[[0, 4]].is_nan());
    }

    #[test]
    fn test_ndvi_zero_denominator_is_nan() {
        let out = ndvi(&array![[0.0, 0.1]], &array![[0.0, 0.3]]);
        assert!(out[[0, 0]].is_nan());
        assert!((out[[0, 1]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ndvi_not_clipped() {
        // negative reflectances cannot come out of to_reflectance, but ndvi
        // itself leaves out-of-range results alone
        let out = ndvi(&array![[-0.2]], &array![[0.1]]);
        assert!((out[[0, 0]] - (-3.0)).abs() < 1e-6);
    }

    #[test]
    fn test_class_code_nodata() {
        assert_eq!(class_code(f32::NAN), 0);
        assert_eq!(class_code(4.0), 4);
        assert_eq!(class_code(300.0), 255);
    }

    #[test]
    fn test_masking_with_classification() {
        let masker = QualityMasker::new(InvalidClasses::default(), 0);
        let red = array![[1000.0, 1000.0, 1000.0]];
        let nir = array![[3000.0, 3000.0, 3000.0]];
        let scl = array![[4.0, 9.0, f32::NAN]];

        let index = masker.index(&red, &nir, Some(&scl)).unwrap();
        assert!((index[[0, 0]] - 0.5).abs() < 1e-6);
        assert!(index[[0, 1]].is_nan());
        assert!(index[[0, 2]].is_nan());
    }

    #[test]
    fn test_missing_classification_skips_mask() {
        let masker = QualityMasker::new(InvalidClasses::default(), 0);
        let index = masker.index(&array![[1000.0]], &array![[3000.0]], None).unwrap();
        assert!(index[[0, 0]].is_finite());
    }

    #[test]
    fn test_cloud_buffer_dilates() {
        let mut scl = Array2::from_elem((5, 5), 4.0f32);
        scl[[2, 2]] = 8.0;

        let masker = QualityMasker::new(InvalidClasses::from_codes([8]).unwrap(), 1);
        let mask = masker.invalid_mask(&scl);

        assert_eq!(mask.iter().filter(|m| **m).count(), 9);
        assert!(mask[[1, 1]] && mask[[3, 3]]);
        assert!(!mask[[0, 0]]);
    }

    #[test]
    fn test_dilate_at_edges() {
        let mut mask = Array2::from_elem((3, 3), false);
        mask[[0, 0]] = true;
        let grown = dilate(&mask, 2);
        assert!(grown.iter().all(|m| *m));
    }

    #[test]
    fn test_shape_mismatch() {
        let masker = QualityMasker::new(InvalidClasses::default(), 0);
        assert!(masker.index(&array![[1.0, 2.0]], &array![[1.0]], None).is_err());
    }

    #[test]
    fn test_valid_fraction() {
        assert_eq!(valid_fraction(&array![[1.0, f32::NAN], [f32::NAN, f32::NAN]]), 0.25);
    }
}
