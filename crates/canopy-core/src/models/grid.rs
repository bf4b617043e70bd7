//! Raster lattice descriptions: affine transform, grid, and pixel windows.

use super::geometry::BBox;
use serde::{Deserialize, Serialize};

/// North-up affine transform mapping pixel space to CRS coordinates.
///
/// `pixel_height` is negative for north-up rasters. Rotation terms are not
/// supported; every grid produced by the pipeline is axis-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self { origin_x, origin_y, pixel_width, pixel_height }
    }

    /// Transform that stretches `bounds` over a `width x height` lattice
    pub fn from_bounds(bounds: &BBox, width: usize, height: usize) -> Self {
        Self {
            origin_x: bounds.min_x,
            origin_y: bounds.max_y,
            pixel_width: bounds.width() / width as f64,
            pixel_height: -bounds.height() / height as f64,
        }
    }

    /// GDAL coefficient order `[ox, pw, 0, oy, 0, ph]`
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self { origin_x: gt[0], pixel_width: gt[1], origin_y: gt[3], pixel_height: gt[5] }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [self.origin_x, self.pixel_width, 0.0, self.origin_y, 0.0, self.pixel_height]
    }

    /// CRS coordinates of the centre of pixel `(col, row)`
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional `(col, row)` of a CRS coordinate; pixel corners are integers
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.origin_x) / self.pixel_width, (y - self.origin_y) / self.pixel_height)
    }

    /// Transform of a sub-window starting at `(col_off, row_off)`
    pub fn shifted(&self, col_off: usize, row_off: usize) -> Self {
        Self {
            origin_x: self.origin_x + col_off as f64 * self.pixel_width,
            origin_y: self.origin_y + row_off as f64 * self.pixel_height,
            ..*self
        }
    }
}

/// A regular raster lattice in a projected CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub epsg: u32,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

impl Grid {
    pub fn new(epsg: u32, transform: GeoTransform, width: usize, height: usize) -> Self {
        Self { epsg, transform, width, height }
    }

    /// ndarray shape `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Outer bounds of the lattice
    pub fn bounds(&self) -> BBox {
        let t = &self.transform;
        let x0 = t.origin_x;
        let x1 = t.origin_x + self.width as f64 * t.pixel_width;
        let y0 = t.origin_y;
        let y1 = t.origin_y + self.height as f64 * t.pixel_height;
        BBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Grid describing a window of this grid
    pub fn window_grid(&self, window: &Window) -> Grid {
        Grid {
            epsg: self.epsg,
            transform: self.transform.shifted(window.col_off, window.row_off),
            width: window.width,
            height: window.height,
        }
    }

    /// Smallest window covering `bounds`, clipped to the grid.
    ///
    /// Offsets are floored and far edges ceiled so every pixel touched by
    /// the box is included. Returns `None` when nothing remains after
    /// clipping.
    pub fn window_for_bounds(&self, bounds: &BBox) -> Option<Window> {
        if !bounds.intersects(&self.bounds()) {
            return None;
        }

        let t = &self.transform;
        let (c0, r0) = t.geo_to_pixel(bounds.min_x, bounds.max_y);
        let (c1, r1) = t.geo_to_pixel(bounds.max_x, bounds.min_y);

        let col_start = c0.min(c1).floor().max(0.0);
        let row_start = r0.min(r1).floor().max(0.0);
        let col_end = c0.max(c1).ceil().min(self.width as f64);
        let row_end = r0.max(r1).ceil().min(self.height as f64);

        if !(col_end > col_start && row_end > row_start) {
            return None;
        }

        Some(Window {
            col_off: col_start as usize,
            row_off: row_start as usize,
            width: (col_end - col_start) as usize,
            height: (row_end - row_start) as usize,
        })
    }
}

/// Rectangular pixel window `(col_off, row_off, width, height)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self { col_off, row_off, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}
