//! Published composite artifacts and their metadata sidecar.

use super::geometry::BBox;
use super::scene::{CompositeMethod, SelectionPolicy};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry identifier of a published artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(pub i64);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry entry for a published native raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Where the imagery came from
    pub origin: String,
    pub acquisition_date: NaiveDate,
    pub epsg: u32,
    pub sensor_description: String,
    pub resolution_m: f64,
    /// Raster bounds in its native CRS
    pub bbox: BBox,
    /// Path of the versioned native raster; unique per record
    pub path: String,
}

/// File names of one bundle, relative to the output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFiles {
    pub native_tif: String,
    pub web_tif: String,
    pub png: String,
    pub metadata: String,
}

impl ArtifactFiles {
    /// Names for a bundle tagged `tag` (a `YYYYMMDD` date or `latest`)
    pub fn named(prefix: &str, tag: &str) -> Self {
        Self {
            native_tif: format!("{}_{}_native.tif", prefix, tag),
            web_tif: format!("{}_{}_3857.tif", prefix, tag),
            png: format!("{}_{}.png", prefix, tag),
            metadata: format!("{}_{}.json", prefix, tag),
        }
    }

    /// `(versioned, alias)` pairs with metadata last
    pub fn paired_with<'a>(&'a self, alias: &'a ArtifactFiles) -> [(&'a str, &'a str); 4] {
        [
            (&self.native_tif, &alias.native_tif),
            (&self.web_tif, &alias.web_tif),
            (&self.png, &alias.png),
            (&self.metadata, &alias.metadata),
        ]
    }
}

/// JSON sidecar written next to every bundle.
///
/// Field order is fixed so two publications of the same composite differ
/// only in `generated_utc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub generated_utc: DateTime<Utc>,
    pub observation_date: NaiveDate,
    pub observation_date_formatted: String,
    pub date_range: String,
    pub search_window: String,
    pub collection: String,
    pub composite_method: CompositeMethod,
    pub selection_policy: SelectionPolicy,
    pub items_used: Vec<String>,
    pub image_dates: Vec<String>,
    pub items_count: usize,
    pub items_skipped: usize,
    pub bbox_4326: [f64; 4],
    pub bounds_leaflet: [[f64; 2]; 2],
    pub grid_size: [usize; 2],
    pub resolution_m: f64,
    pub crs_epsg: u32,
    pub cloud_max: f64,
    pub per_tile: usize,
    pub min_valid_fraction: f64,
    pub cloud_buffer_px: usize,
    pub files: ArtifactFiles,
}

impl ArtifactMetadata {
    /// `YYYYMMDD` tag used in versioned file names
    pub fn tag(&self) -> String {
        date_tag(self.observation_date)
    }

    /// Human-readable description stored in the artifact registry
    pub fn sensor_description(&self) -> String {
        format!("{} NDVI | {} | {}", self.collection, self.composite_method, self.date_range)
    }
}

/// `YYYYMMDD`
pub fn date_tag(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Leaflet `[[south, west], [north, east]]` bounds of a geographic box
pub fn leaflet_bounds(bbox: &BBox) -> [[f64; 2]; 2] {
    [[bbox.min_y, bbox.min_x], [bbox.max_y, bbox.max_x]]
}
