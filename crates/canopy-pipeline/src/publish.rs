//! Artifact bundle publication.
//!
//! A bundle is the native GeoTIFF, its Web Mercator copy, a colour-mapped
//! PNG and the metadata sidecar. Versioned files are written first; the
//! `latest` aliases are then promoted data first, metadata last.

use crate::atomic::{AtomicWriter, RenameOutcome};
use canopy_core::config::PipelineSettings;
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::artifact::{date_tag, leaflet_bounds};
use canopy_core::models::geometry::EPSG_WGS84;
use canopy_core::models::{
    ArtifactFiles, ArtifactMetadata, CompositeMethod, Grid, SelectionPolicy,
};
use canopy_geo::grid::{build_web_grid, grid_bounds_in};
use canopy_raster::colormap::ColorRamp;
use canopy_raster::warp::warp;
use canopy_raster::{RasterIo, Resampling, SourceRaster};
use chrono::{DateTime, NaiveDate, Utc};
use image::ImageFormat;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Alias tag of the most recent bundle
pub const LATEST_TAG: &str = "latest";

/// A scene that contributed to the composite
#[derive(Debug, Clone, PartialEq)]
pub struct UsedScene {
    pub item_id: String,
    pub datetime: Option<DateTime<Utc>>,
}

/// Everything the metadata sidecar records about how a composite was made
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub collection: String,
    pub search_window: String,
    pub composite_method: CompositeMethod,
    pub selection_policy: SelectionPolicy,
    pub scenes: Vec<UsedScene>,
    pub items_skipped: usize,
    pub resolution_m: f64,
    pub cloud_max: f64,
    pub per_tile: usize,
    pub min_valid_fraction: f64,
    pub cloud_buffer_px: usize,
}

impl Provenance {
    pub fn from_settings(
        settings: &PipelineSettings,
        search_window: String,
        scenes: Vec<UsedScene>,
        items_skipped: usize,
    ) -> Self {
        Self {
            collection: settings.collection.clone(),
            search_window,
            composite_method: settings.composite_method,
            selection_policy: settings.selection_policy,
            scenes,
            items_skipped,
            resolution_m: settings.resolution_m,
            cloud_max: settings.cloud_ceiling,
            per_tile: settings.per_tile,
            min_valid_fraction: settings.min_valid_fraction,
            cloud_buffer_px: settings.cloud_buffer_px,
        }
    }

    /// Latest acquisition date among the used scenes
    pub fn observation_date(&self) -> Option<NaiveDate> {
        self.scenes.iter().filter_map(|s| s.datetime).max().map(|dt| dt.date_naive())
    }

    /// `first → last` over the used scenes, or a single date when they agree
    pub fn date_range(&self) -> String {
        let first = self.scenes.iter().filter_map(|s| s.datetime).min();
        let last = self.scenes.iter().filter_map(|s| s.datetime).max();
        match (first, last) {
            (Some(first), Some(last)) if first.date_naive() == last.date_naive() => {
                first.format("%Y-%m-%d").to_string()
            }
            (Some(first), Some(last)) => {
                format!("{} → {}", first.format("%Y-%m-%d"), last.format("%Y-%m-%d"))
            }
            _ => "unknown".to_string(),
        }
    }
}

/// Assemble the metadata sidecar for a composite on `native`
pub fn build_metadata(
    provenance: &Provenance,
    native: &Grid,
    web: &Grid,
    prefix: &str,
    generated_utc: DateTime<Utc>,
) -> Result<ArtifactMetadata> {
    let observation_date =
        provenance.observation_date().unwrap_or_else(|| generated_utc.date_naive());
    let bbox_4326 = grid_bounds_in(web, EPSG_WGS84)?;

    Ok(ArtifactMetadata {
        generated_utc,
        observation_date,
        observation_date_formatted: observation_date.format("%d/%m/%Y").to_string(),
        date_range: provenance.date_range(),
        search_window: provenance.search_window.clone(),
        collection: provenance.collection.clone(),
        composite_method: provenance.composite_method,
        selection_policy: provenance.selection_policy,
        items_used: provenance.scenes.iter().map(|s| s.item_id.clone()).collect(),
        image_dates: provenance
            .scenes
            .iter()
            .map(|s| {
                s.datetime
                    .map(|dt| dt.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            })
            .collect(),
        items_count: provenance.scenes.len(),
        items_skipped: provenance.items_skipped,
        bbox_4326: bbox_4326.to_array(),
        bounds_leaflet: leaflet_bounds(&bbox_4326),
        grid_size: [native.width, native.height],
        resolution_m: provenance.resolution_m,
        crs_epsg: native.epsg,
        cloud_max: provenance.cloud_max,
        per_tile: provenance.per_tile,
        min_valid_fraction: provenance.min_valid_fraction,
        cloud_buffer_px: provenance.cloud_buffer_px,
        files: ArtifactFiles::named(prefix, &date_tag(observation_date)),
    })
}

/// Read a metadata sidecar back from disk
pub fn read_metadata(path: &Path) -> Result<ArtifactMetadata> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// What a publication left on disk
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub metadata: ArtifactMetadata,
    pub native_grid: Grid,
    pub output_dir: PathBuf,
    /// Versioned files now in place
    pub versioned: Vec<PathBuf>,
    /// Aliases now pointing at this bundle
    pub promoted: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl PublishReport {
    pub fn native_path(&self) -> PathBuf {
        self.output_dir.join(&self.metadata.files.native_tif)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.output_dir.join(&self.metadata.files.metadata)
    }

    /// Whether the versioned native raster made it into place
    pub fn native_published(&self) -> bool {
        self.versioned.contains(&self.native_path())
    }

    /// Whether every alias, metadata included, was promoted
    pub fn latest_promoted(&self) -> bool {
        self.promoted.len() == 4
    }
}

/// Writes composite bundles into an output directory
pub struct ArtifactPublisher {
    io: Arc<dyn RasterIo>,
    output_dir: PathBuf,
    prefix: String,
    max_dim: usize,
    writer: AtomicWriter,
    ramp: ColorRamp,
}

impl ArtifactPublisher {
    pub fn new(
        io: Arc<dyn RasterIo>,
        output_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        max_dim: usize,
    ) -> Result<Self> {
        Ok(Self {
            io,
            output_dir: output_dir.into(),
            prefix: prefix.into(),
            max_dim,
            writer: AtomicWriter::default(),
            ramp: ColorRamp::ndvi()?,
        })
    }

    pub fn with_writer(mut self, writer: AtomicWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Publish `composite` and promote it to `latest`
    pub async fn publish(
        &self,
        composite: &SourceRaster,
        provenance: &Provenance,
        generated_utc: DateTime<Utc>,
    ) -> Result<PublishReport> {
        tokio::fs::create_dir_all(&self.output_dir).await.map_err(|e| CanopyError::Publish {
            path: self.output_dir.clone(),
            reason: e.to_string(),
        })?;

        let native = composite.grid;
        let web_grid = build_web_grid(&native, self.max_dim)?;
        let web_data = warp(composite, &web_grid, Resampling::Bilinear)?;
        let metadata = build_metadata(provenance, &native, &web_grid, &self.prefix, generated_utc)?;
        let metadata_bytes = serde_json::to_vec_pretty(&metadata)?;

        let versioned = metadata.files.clone();
        let latest = ArtifactFiles::named(&self.prefix, LATEST_TAG);
        let mut report = PublishReport {
            metadata,
            native_grid: native,
            output_dir: self.output_dir.clone(),
            versioned: Vec::new(),
            promoted: Vec::new(),
            warnings: Vec::new(),
        };

        let io = &self.io;
        let outcomes = [
            self.writer
                .publish(&self.path(&versioned.native_tif), |p| {
                    io.write_geotiff(p, &composite.data, &native)
                })
                .await?,
            self.writer
                .publish(&self.path(&versioned.web_tif), |p| {
                    io.write_geotiff(p, &web_data, &web_grid)
                })
                .await?,
            self.writer
                .publish(&self.path(&versioned.png), |p| {
                    self.ramp
                        .render(&composite.data)
                        .save_with_format(p, ImageFormat::Png)
                        .map_err(|e| CanopyError::Raster(format!("PNG encoding failed: {}", e)))
                })
                .await?,
            self.writer
                .publish(&self.path(&versioned.metadata), |p| Ok(fs::write(p, &metadata_bytes)?))
                .await?,
        ];

        let names = [&versioned.native_tif, &versioned.web_tif, &versioned.png, &versioned.metadata];
        let mut in_place = [false; 4];
        for (i, (name, outcome)) in names.iter().zip(outcomes).enumerate() {
            let path = self.path(name);
            match outcome {
                RenameOutcome::Renamed => {
                    in_place[i] = true;
                    report.versioned.push(path);
                }
                RenameOutcome::TempKept { temp, reason } => {
                    report.warnings.push(format!(
                        "{} not renamed into place ({}); content left at {}",
                        path.display(),
                        reason,
                        temp.display()
                    ));
                }
            }
        }

        // `latest` moves as a whole bundle or not at all
        if let Some(missing) = in_place.iter().position(|ok| !ok) {
            report.warnings.push(format!(
                "latest aliases not promoted because {} is not in place",
                self.path(names[missing]).display()
            ));
        } else {
            for (source, alias) in versioned.paired_with(&latest) {
                let alias_path = self.path(alias);
                let failure = match self.writer.promote_copy(&self.path(source), &alias_path).await {
                    Ok(RenameOutcome::Renamed) => {
                        report.promoted.push(alias_path);
                        continue;
                    }
                    Ok(RenameOutcome::TempKept { reason, .. }) => reason,
                    Err(e) => e.to_string(),
                };
                report.warnings.push(format!(
                    "{} not promoted ({}); remaining aliases left untouched",
                    alias_path.display(),
                    failure
                ));
                break;
            }
        }

        for warning in &report.warnings {
            tracing::warn!("{}", warning);
        }
        tracing::info!(
            tag = %report.metadata.tag(),
            versioned = report.versioned.len(),
            promoted = report.promoted.len(),
            "Published artifact bundle"
        );

        Ok(report)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scene(id: &str, y: i32, m: u32, d: u32) -> UsedScene {
        UsedScene {
            item_id: id.to_string(),
            datetime: Some(Utc.with_ymd_and_hms(y, m, d, 10, 56, 0).unwrap()),
        }
    }

    fn provenance(scenes: Vec<UsedScene>) -> Provenance {
        Provenance::from_settings(
            &PipelineSettings::default(),
            "2025-01-01T00:00:00Z/2025-01-13T00:00:00Z".to_string(),
            scenes,
            1,
        )
    }

    #[test]
    fn test_observation_date_is_latest_scene() {
        let p = provenance(vec![scene("a", 2025, 1, 2), scene("b", 2025, 1, 9)]);
        assert_eq!(p.observation_date(), NaiveDate::from_ymd_opt(2025, 1, 9));
        assert_eq!(p.date_range(), "2025-01-02 → 2025-01-09");
    }

    #[test]
    fn test_single_day_range() {
        let p = provenance(vec![scene("a", 2025, 1, 2), scene("b", 2025, 1, 2)]);
        assert_eq!(p.date_range(), "2025-01-02");
    }

    #[test]
    fn test_undated_scenes() {
        let p = provenance(vec![UsedScene { item_id: "a".into(), datetime: None }]);
        assert_eq!(p.observation_date(), None);
        assert_eq!(p.date_range(), "unknown");
    }
}
