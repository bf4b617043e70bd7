//! Per-polygon statistics over a published index raster.

use crate::progress::{RunPhase, RunProgress};
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::geometry::EPSG_WGS84;
use canopy_core::models::{
    ArtifactId, ArtifactMetadata, ArtifactRecord, Geometry, Grid, PolygonId, PolygonRecord,
    PolygonSkip, ZonalCounters, ZonalStatRow, ZonalStats, INDEX_TYPE_NDVI,
};
use canopy_geo::models::to_multi_polygon;
use canopy_geo::transform::{transform_geometry, CoordTransformer};
use canopy_geo::validation::validate_zone;
use canopy_raster::mask::{masked_values, polygon_mask};
use canopy_raster::{RasterIo, WindowedRaster};
use canopy_store::{PolygonStore, ZonalStatsStore, ZonalWriteTx};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Origin recorded for every registered artifact
pub const ARTIFACT_ORIGIN: &str = "satellite";

/// Default number of polygons between progress log lines
pub const DEFAULT_PROGRESS_EVERY: usize = 2000;

/// The published raster a zonal pass reads from
#[derive(Debug, Clone, PartialEq)]
pub struct ZonalTarget {
    pub artifact_id: ArtifactId,
    pub raster_path: PathBuf,
    pub observation_date: NaiveDate,
    /// `YYYYMMDD` tag used for thumbnail names
    pub tag: String,
}

impl ZonalTarget {
    /// Register the native raster of `metadata` and target it.
    ///
    /// Registration is idempotent, so reprocessing an artifact reuses its id.
    pub async fn register(
        store: &dyn ZonalStatsStore,
        metadata: &ArtifactMetadata,
        native_grid: &Grid,
        output_dir: &Path,
    ) -> Result<Self> {
        let raster_path = output_dir.join(&metadata.files.native_tif);
        let record = ArtifactRecord {
            origin: ARTIFACT_ORIGIN.to_string(),
            acquisition_date: metadata.observation_date,
            epsg: native_grid.epsg,
            sensor_description: metadata.sensor_description(),
            resolution_m: metadata.resolution_m,
            bbox: native_grid.bounds(),
            path: raster_path.to_string_lossy().into_owned(),
        };
        let artifact_id = store.register_artifact(&record).await?;
        tracing::info!(artifact_id = %artifact_id, path = %record.path, "Artifact registered");

        Ok(Self {
            artifact_id,
            raster_path,
            observation_date: metadata.observation_date,
            tag: metadata.tag(),
        })
    }

    pub fn artifact_path(&self) -> String {
        self.raster_path.to_string_lossy().into_owned()
    }
}

/// Result of evaluating one polygon
#[derive(Debug, Clone, PartialEq)]
pub enum PolygonOutcome {
    Row(ZonalStatRow),
    Skipped { polygon_id: PolygonId, skip: PolygonSkip },
}

/// Outcome of a completed zonal pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZonalReport {
    pub artifact_id: ArtifactId,
    pub counters: ZonalCounters,
}

/// Computes and stores per-polygon statistics for one artifact at a time
pub struct ZonalEngine {
    io: Arc<dyn RasterIo>,
    polygons: Arc<dyn PolygonStore>,
    stats: Arc<dyn ZonalStatsStore>,
    batch_size: usize,
    progress_every: usize,
    thumbnail_dir: String,
}

struct PassContext<'a> {
    target: &'a ZonalTarget,
    grid: Grid,
    computed_at: DateTime<Utc>,
}

impl ZonalEngine {
    pub fn new(
        io: Arc<dyn RasterIo>,
        polygons: Arc<dyn PolygonStore>,
        stats: Arc<dyn ZonalStatsStore>,
    ) -> Self {
        Self {
            io,
            polygons,
            stats,
            batch_size: 500,
            progress_every: DEFAULT_PROGRESS_EVERY,
            thumbnail_dir: "static/thumbnails".to_string(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress_every(mut self, progress_every: usize) -> Self {
        self.progress_every = progress_every.max(1);
        self
    }

    pub fn with_thumbnail_dir(mut self, thumbnail_dir: impl Into<String>) -> Self {
        self.thumbnail_dir = thumbnail_dir.into();
        self
    }

    pub fn stats_store(&self) -> &dyn ZonalStatsStore {
        self.stats.as_ref()
    }

    pub async fn run(&self, target: &ZonalTarget) -> Result<ZonalReport> {
        self.run_with_progress(target, |_| {}).await
    }

    /// Evaluate every polygon against the target raster and upsert the rows
    /// in one transaction.
    ///
    /// Polygon-level problems only move counters. A store or raster read
    /// failure rolls the transaction back and is returned.
    pub async fn run_with_progress<F>(&self, target: &ZonalTarget, mut progress: F) -> Result<ZonalReport>
    where
        F: FnMut(RunProgress),
    {
        let raster = self.io.open(&target.raster_path)?;
        let polygons = self.polygons.list_polygons().await?;
        let total = polygons.len();
        tracing::info!(
            artifact_id = %target.artifact_id,
            polygons = total,
            raster = %target.raster_path.display(),
            "Starting zonal statistics"
        );

        let ctx = PassContext { target, grid: *raster.grid(), computed_at: Utc::now() };
        let mut counters = ZonalCounters::default();
        let mut transformers: HashMap<u32, CoordTransformer> = HashMap::new();
        let mut batch: Vec<ZonalStatRow> = Vec::with_capacity(self.batch_size);
        let mut tx = self.stats.begin(target.artifact_id).await?;

        for (i, polygon) in polygons.iter().enumerate() {
            counters.processed += 1;

            let outcome = match self.evaluate(polygon, raster.as_ref(), &ctx, &mut transformers) {
                Ok(outcome) => outcome,
                Err(e) => return Err(abort(tx, &counters, e).await),
            };

            match outcome {
                PolygonOutcome::Row(row) => batch.push(row),
                PolygonOutcome::Skipped { polygon_id, skip } => {
                    if let PolygonSkip::GeometryError(reason) = &skip {
                        tracing::warn!(polygon_id = %polygon_id, reason = %reason, "Polygon geometry error");
                    } else {
                        tracing::debug!(polygon_id = %polygon_id, skip = ?skip, "Polygon skipped");
                    }
                    counters.record_skip(&skip);
                }
            }

            if batch.len() >= self.batch_size {
                if let Err(e) = flush(tx.as_mut(), &mut batch, &mut counters).await {
                    return Err(abort(tx, &counters, e).await);
                }
            }

            if (i + 1) % self.progress_every == 0 {
                tracing::info!(done = i + 1, total, counters = %counters, "Zonal progress");
            }
            progress(RunProgress::new(
                RunPhase::ZonalStatistics,
                i + 1,
                total,
                format!("polygon {}", polygon.id),
            ));
        }

        if let Err(e) = flush(tx.as_mut(), &mut batch, &mut counters).await {
            return Err(abort(tx, &counters, e).await);
        }
        if let Err(e) = tx.commit().await {
            tracing::error!(counters = %counters, error = %e, "Zonal commit failed");
            return Err(e);
        }

        tracing::info!(artifact_id = %target.artifact_id, counters = %counters, "Zonal statistics committed");
        Ok(ZonalReport { artifact_id: target.artifact_id, counters })
    }

    /// Run one polygon through parse, validate, reproject, window, mask
    /// and summarize. Only raster read failures are errors.
    fn evaluate(
        &self,
        polygon: &PolygonRecord,
        raster: &dyn WindowedRaster,
        ctx: &PassContext<'_>,
        transformers: &mut HashMap<u32, CoordTransformer>,
    ) -> Result<PolygonOutcome> {
        let skipped = |skip: PolygonSkip| -> Result<PolygonOutcome> {
            Ok(PolygonOutcome::Skipped { polygon_id: polygon.id, skip })
        };
        let geometry_error = |e: CanopyError| skipped(PolygonSkip::GeometryError(e.to_string()));

        let geometry = match Geometry::from_geojson_str(&polygon.geojson) {
            Ok(g) => g,
            Err(e) => return geometry_error(e),
        };
        if let Err(e) = validate_zone(&geometry).into_result() {
            return geometry_error(e);
        }

        let srid = if polygon.srid == 0 { EPSG_WGS84 } else { polygon.srid };
        let transformer = match transformers.entry(srid) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                match CoordTransformer::new(srid, ctx.grid.epsg) {
                    Ok(t) => entry.insert(t),
                    Err(e) => return geometry_error(e),
                }
            }
        };
        let projected = match transform_geometry(&geometry, transformer) {
            Ok(g) => g,
            Err(e) => return geometry_error(e),
        };

        let (Some(bounds), Some(shape)) = (projected.bbox(), to_multi_polygon(&projected)) else {
            return geometry_error(CanopyError::InvalidGeometry {
                reason: "polygon has no vertices".to_string(),
            });
        };

        let Some(window) = ctx.grid.window_for_bounds(&bounds) else {
            return skipped(PolygonSkip::OutOfBounds);
        };
        if window.is_empty() {
            return skipped(PolygonSkip::OutOfBounds);
        }

        let data = raster.read_window(&window)?;
        let mask = polygon_mask(&shape, &ctx.grid.window_grid(&window));
        let Some(stats) = ZonalStats::from_values(masked_values(&data, &mask)) else {
            return skipped(PolygonSkip::NoValidPixels);
        };

        Ok(PolygonOutcome::Row(self.row(polygon.id, &stats, ctx)))
    }

    fn row(&self, polygon_id: PolygonId, stats: &ZonalStats, ctx: &PassContext<'_>) -> ZonalStatRow {
        ZonalStatRow {
            artifact_id: ctx.target.artifact_id,
            polygon_id,
            index_type: INDEX_TYPE_NDVI.to_string(),
            computed_at: ctx.computed_at,
            index_observation_date: ctx.target.observation_date,
            crs_epsg: ctx.grid.epsg,
            resolution_m: ctx.grid.transform.pixel_width.abs(),
            mean: stats.mean,
            min: stats.min,
            max: stats.max,
            std: stats.std,
            artifact_path: ctx.target.artifact_path(),
            visualization_path: format!(
                "{}/{}_{}.png",
                self.thumbnail_dir.trim_end_matches('/'),
                ctx.target.tag,
                polygon_id
            ),
        }
    }
}

async fn flush(
    tx: &mut dyn ZonalWriteTx,
    batch: &mut Vec<ZonalStatRow>,
    counters: &mut ZonalCounters,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    tx.upsert_rows(batch).await?;
    counters.inserted += batch.len();
    tracing::debug!(rows = batch.len(), inserted = counters.inserted, "Flushed zonal batch");
    batch.clear();
    Ok(())
}

async fn abort(tx: Box<dyn ZonalWriteTx>, counters: &ZonalCounters, error: CanopyError) -> CanopyError {
    tracing::error!(counters = %counters, error = %error, "Zonal pass failed, rolling back");
    if let Err(e) = tx.rollback().await {
        tracing::error!(error = %e, "Rollback failed");
    }
    error
}
