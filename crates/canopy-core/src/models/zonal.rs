//! Zonal-statistics units and rows.

use super::artifact::ArtifactId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index type recorded on every row produced by this pipeline
pub const INDEX_TYPE_NDVI: &str = "NDVI";

/// Stable identifier of an externally owned polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolygonId(pub i64);

impl fmt::Display for PolygonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Polygon as exported by the polygon store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonRecord {
    pub id: PolygonId,
    /// GeoJSON geometry text
    pub geojson: String,
    pub srid: u32,
}

/// Summary of the finite pixel values under a polygon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZonalStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation
    pub std: f64,
}

impl ZonalStats {
    /// Statistics of the finite values; `None` when there are none
    pub fn from_values<I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut finite = Vec::new();

        for v in values.into_iter().filter(|v| v.is_finite()) {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
            finite.push(v);
        }

        if count == 0 {
            return None;
        }

        let mean = sum / count as f64;
        let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

        Some(Self { count, mean, min, max, std: variance.sqrt() })
    }
}

/// One upserted row, unique per `(artifact_id, polygon_id, index_type)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalStatRow {
    pub artifact_id: ArtifactId,
    pub polygon_id: PolygonId,
    pub index_type: String,
    pub computed_at: DateTime<Utc>,
    pub index_observation_date: NaiveDate,
    pub crs_epsg: u32,
    pub resolution_m: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    pub artifact_path: String,
    pub visualization_path: String,
}

impl ZonalStatRow {
    pub fn key(&self) -> (ArtifactId, PolygonId, &str) {
        (self.artifact_id, self.polygon_id, self.index_type.as_str())
    }
}

/// Terminal skip states of the per-polygon state machine
#[derive(Debug, Clone, PartialEq)]
pub enum PolygonSkip {
    OutOfBounds,
    NoValidPixels,
    GeometryError(String),
}

/// Counters reported at the end of a zonal pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonalCounters {
    pub processed: usize,
    pub inserted: usize,
    pub out_of_bounds: usize,
    pub no_valid_pixels: usize,
    pub errors: usize,
}

impl ZonalCounters {
    pub fn record_skip(&mut self, skip: &PolygonSkip) {
        match skip {
            PolygonSkip::OutOfBounds => self.out_of_bounds += 1,
            PolygonSkip::NoValidPixels => self.no_valid_pixels += 1,
            PolygonSkip::GeometryError(_) => self.errors += 1,
        }
    }
}

impl fmt::Display for ZonalCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} inserted={} out_of_bounds={} no_valid_pixels={} errors={}",
            self.processed, self.inserted, self.out_of_bounds, self.no_valid_pixels, self.errors
        )
    }
}
