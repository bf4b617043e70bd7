//! Composite diagnostics

use ndarray::Array2;
use serde::Serialize;
use std::fmt;

/// Bins of the index histogram over `[-1, 1]`
pub const HISTOGRAM_BINS: usize = 10;

/// Summary of the finite values of a raster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RasterSummary {
    pub total: usize,
    pub finite: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f64,
    pub p2: f32,
    pub p50: f32,
    pub p98: f32,
}

impl RasterSummary {
    /// `None` when the raster has no finite pixel
    pub fn of(data: &Array2<f32>) -> Option<Self> {
        let mut values: Vec<f32> = data.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));

        let mean = values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64;
        Some(Self {
            total: data.len(),
            finite: values.len(),
            min: values[0],
            max: values[values.len() - 1],
            mean,
            p2: percentile(&values, 2.0),
            p50: percentile(&values, 50.0),
            p98: percentile(&values, 98.0),
        })
    }

    pub fn finite_fraction(&self) -> f64 {
        self.finite as f64 / self.total as f64
    }
}

impl fmt::Display for RasterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "finite={}/{} min={:.3} max={:.3} mean={:.3} p2={:.3} p50={:.3} p98={:.3}",
            self.finite, self.total, self.min, self.max, self.mean, self.p2, self.p50, self.p98
        )
    }
}

/// Linear-interpolated percentile of sorted values
pub fn percentile(sorted: &[f32], pct: f64) -> f32 {
    match sorted.len() {
        0 => f32::NAN,
        1 => sorted[0],
        n => {
            let rank = (pct / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = (rank - lo as f64) as f32;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Counts of finite values in equal bins over `[-1, 1]`; values outside the
/// range land in the edge bins
pub fn histogram(data: &Array2<f32>) -> [usize; HISTOGRAM_BINS] {
    let mut bins = [0usize; HISTOGRAM_BINS];
    let per_unit = HISTOGRAM_BINS as f32 / 2.0;
    for v in data.iter().filter(|v| v.is_finite()) {
        let idx = ((v + 1.0) * per_unit).floor().clamp(0.0, (HISTOGRAM_BINS - 1) as f32) as usize;
        bins[idx] += 1;
    }
    bins
}
