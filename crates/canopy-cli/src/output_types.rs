use canopy_core::models::{CatalogItem, ZonalCounters};
use canopy_pipeline::{RunReport, ZonalReport};
use canopy_raster::stats::{RasterSummary, HISTOGRAM_BINS};
use serde::Serialize;
use tabled::Tabled;

/// Output for run command
#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub tag: String,
    pub observation_date: String,
    pub date_range: String,
    pub items_used: Vec<String>,
    pub skipped: Vec<SkippedScene>,
    pub grid_size: [usize; 2],
    pub crs_epsg: u32,
    pub summary: RasterSummary,
    pub histogram: [usize; HISTOGRAM_BINS],
    pub files: Vec<String>,
    pub latest_promoted: bool,
    pub warnings: Vec<String>,
    pub zonal: Option<ZonalOutput>,
}

#[derive(Debug, Serialize)]
pub struct SkippedScene {
    pub item_id: String,
    pub reason: String,
}

impl From<&RunReport> for RunOutput {
    fn from(report: &RunReport) -> Self {
        let metadata = &report.publish.metadata;
        Self {
            tag: metadata.tag(),
            observation_date: metadata.observation_date_formatted.clone(),
            date_range: metadata.date_range.clone(),
            items_used: metadata.items_used.clone(),
            skipped: report
                .skipped
                .iter()
                .map(|(item_id, reason)| SkippedScene {
                    item_id: item_id.clone(),
                    reason: reason.to_string(),
                })
                .collect(),
            grid_size: metadata.grid_size,
            crs_epsg: metadata.crs_epsg,
            summary: report.summary.clone(),
            histogram: report.histogram,
            files: report
                .publish
                .versioned
                .iter()
                .chain(&report.publish.promoted)
                .map(|p| p.display().to_string())
                .collect(),
            latest_promoted: report.publish.latest_promoted(),
            warnings: report.publish.warnings.clone(),
            zonal: report.zonal.as_ref().map(ZonalOutput::from),
        }
    }
}

/// Output for zonal command and the zonal part of a run
#[derive(Debug, Serialize)]
pub struct ZonalOutput {
    pub artifact_id: i64,
    pub counters: ZonalCounters,
}

impl From<&ZonalReport> for ZonalOutput {
    fn from(report: &ZonalReport) -> Self {
        Self { artifact_id: report.artifact_id.0, counters: report.counters }
    }
}

/// One row of the scenes table
#[derive(Debug, Serialize, Tabled)]
pub struct SceneRow {
    #[tabled(rename = "#")]
    pub rank: usize,
    #[tabled(rename = "Item")]
    pub id: String,
    #[tabled(rename = "Tile")]
    pub tile: String,
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "Cloud %")]
    pub cloud_cover: String,
}

impl SceneRow {
    pub fn new(rank: usize, item: &CatalogItem) -> Self {
        Self {
            rank,
            id: item.id.clone(),
            tile: item.tile_id.clone(),
            date: item.date_label(),
            cloud_cover: format!("{:.1}", item.cloud_cover),
        }
    }
}

/// Output for scenes command
#[derive(Debug, Serialize)]
pub struct ScenesOutput {
    pub search_window: String,
    pub candidates: usize,
    pub selected: Vec<SceneRow>,
    pub grid_size: [usize; 2],
    pub crs_epsg: u32,
}

/// One row of the config table
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}

/// One row of the migration status table
#[derive(Debug, Serialize, Tabled)]
pub struct MigrationRow {
    #[tabled(rename = "Version")]
    pub version: i64,
    #[tabled(rename = "Description")]
    pub description: String,
    #[tabled(rename = "Applied")]
    pub applied: bool,
}
