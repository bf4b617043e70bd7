//! Piecewise-linear color ramp for index rasters

use canopy_core::error::{CanopyError, Result};
use image::{Rgba, RgbaImage};
use ndarray::Array2;

/// One breakpoint of a ramp, in index units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub threshold: f32,
    pub rgb: [u8; 3],
}

const fn stop(threshold: f32, hex: u32) -> ColorStop {
    ColorStop {
        threshold,
        rgb: [(hex >> 16) as u8, (hex >> 8) as u8, hex as u8],
    }
}

/// Red-yellow-green ramp from bare soil to dense vegetation
pub const NDVI_STOPS: [ColorStop; 12] = [
    stop(-0.2, 0x000000),
    stop(0.0, 0xa50026),
    stop(0.2, 0xd73027),
    stop(0.3, 0xf46d43),
    stop(0.4, 0xfdae61),
    stop(0.5, 0xfee08b),
    stop(0.6, 0xffffbf),
    stop(0.7, 0xd9ef8b),
    stop(0.8, 0xa6d96a),
    stop(0.9, 0x66bd63),
    stop(0.95, 0x1a9850),
    stop(1.0, 0x006837),
];

/// Validated ordered ramp
#[derive(Debug, Clone, PartialEq)]
pub struct ColorRamp {
    stops: Vec<ColorStop>,
}

impl ColorRamp {
    /// Ramp with at least one stop and strictly increasing thresholds
    pub fn new(stops: Vec<ColorStop>) -> Result<Self> {
        if stops.is_empty() {
            return Err(CanopyError::ConfigInvalid {
                key: "color_ramp".to_string(),
                reason: "ramp has no stops".to_string(),
            });
        }
        if let Some(pair) = stops.windows(2).find(|w| !(w[0].threshold < w[1].threshold)) {
            return Err(CanopyError::ConfigInvalid {
                key: "color_ramp".to_string(),
                reason: format!(
                    "thresholds must be strictly increasing ({} then {})",
                    pair[0].threshold, pair[1].threshold
                ),
            });
        }
        Ok(Self { stops })
    }

    /// The standard NDVI ramp
    pub fn ndvi() -> Result<Self> {
        Self::new(NDVI_STOPS.to_vec())
    }

    /// RGBA for one value; transparent when the value is not finite
    pub fn color(&self, value: f32) -> [u8; 4] {
        if !value.is_finite() {
            return [0, 0, 0, 0];
        }

        let first = self.stops[0];
        let last = self.stops[self.stops.len() - 1];
        if value <= first.threshold {
            return opaque(first.rgb);
        }
        if value >= last.threshold {
            return opaque(last.rgb);
        }

        // value lies strictly inside the ramp, so a bracketing pair exists
        let upper = self.stops.partition_point(|s| s.threshold <= value);
        let (lo, hi) = (self.stops[upper - 1], self.stops[upper]);
        let t = (value - lo.threshold) / (hi.threshold - lo.threshold);

        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        opaque([mix(lo.rgb[0], hi.rgb[0]), mix(lo.rgb[1], hi.rgb[1]), mix(lo.rgb[2], hi.rgb[2])])
    }

    /// Render an index raster to an RGBA image of the same size
    pub fn render(&self, data: &Array2<f32>) -> RgbaImage {
        let (rows, cols) = data.dim();
        RgbaImage::from_fn(cols as u32, rows as u32, |x, y| {
            Rgba(self.color(data[[y as usize, x as usize]]))
        })
    }
}

fn opaque(rgb: [u8; 3]) -> [u8; 4] {
    [rgb[0], rgb[1], rgb[2], 255]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ndvi_ramp_is_valid() {
        assert!(ColorRamp::ndvi().is_ok());
    }

    #[test]
    fn test_rejects_unordered_and_empty() {
        assert!(ColorRamp::new(vec![]).is_err());
        assert!(ColorRamp::new(vec![stop(0.5, 0xffffff), stop(0.5, 0x000000)]).is_err());
        assert!(ColorRamp::new(vec![stop(0.5, 0xffffff), stop(0.1, 0x000000)]).is_err());
    }

    #[test]
    fn test_clamped_ends() {
        let ramp = ColorRamp::ndvi().unwrap();
        assert_eq!(ramp.color(-0.9), [0, 0, 0, 255]);
        assert_eq!(ramp.color(1.7), [0x00, 0x68, 0x37, 255]);
    }

    #[test]
    fn test_exact_stop_and_interpolation() {
        let ramp = ColorRamp::new(vec![stop(0.0, 0x000000), stop(1.0, 0xc8c8c8)]).unwrap();
        assert_eq!(ramp.color(0.0), [0, 0, 0, 255]);
        assert_eq!(ramp.color(0.5), [100, 100, 100, 255]);

        let ndvi = ColorRamp::ndvi().unwrap();
        assert_eq!(ndvi.color(0.6), [0xff, 0xff, 0xbf, 255]);
    }

    #[test]
    fn test_non_finite_is_transparent() {
        let ramp = ColorRamp::ndvi().unwrap();
        assert_eq!(ramp.color(f32::NAN)[3], 0);
        assert_eq!(ramp.color(f32::INFINITY)[3], 0);
    }

    #[test]
    fn test_render_dimensions() {
        let ramp = ColorRamp::ndvi().unwrap();
        let img = ramp.render(&array![[0.1, f32::NAN, 0.9], [0.2, 0.3, 0.4]]);
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(1, 0)[3], 0);
        assert_eq!(img.get_pixel(2, 0)[3], 255);
    }
}
