//! One compositing run: plan, process scenes, composite, publish, and
//! compute zonal statistics.

use crate::atomic::AtomicWriter;
use crate::fetch::{BandFetcher, RetryPolicy};
use crate::progress::{RunPhase, RunProgress};
use crate::publish::{ArtifactPublisher, Provenance, PublishReport, UsedScene};
use crate::scene::{SceneOutcome, SceneProcessor};
use crate::zonal::{ZonalEngine, ZonalReport, ZonalTarget};
use canopy_catalog::{select_scenes, SceneCatalog, SceneQuery, SearchWindow, SelectionCriteria};
use canopy_core::config::PipelineSettings;
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::{BBox, BBoxAnchor, CatalogItem, Crs, Grid, SkipReason};
use canopy_core::roi::load_roi;
use canopy_geo::grid::{build_grid, GridSpec};
use canopy_geo::transform::reproject_geometry;
use canopy_raster::composite::Compositor;
use canopy_raster::quality::QualityMasker;
use canopy_raster::stats::{histogram, RasterSummary, HISTOGRAM_BINS};
use canopy_raster::{RasterIo, SourceRaster};
use canopy_store::{PolygonStore, ZonalStatsStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Per-invocation switches that are not part of the settings
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// End of the search window and `generated_utc` of the metadata
    pub now: DateTime<Utc>,
    /// Stop after planning
    pub dry_run: bool,
    pub skip_zonal: bool,
    /// Restrict the run to a fraction of the ROI envelope
    pub test_bbox: Option<(f64, BBoxAnchor)>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { now: Utc::now(), dry_run: false, skip_zonal: false, test_bbox: None }
    }
}

/// What a run decided before touching any pixels
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub bbox_4326: BBox,
    pub window: SearchWindow,
    pub candidates: usize,
    pub selected: Vec<CatalogItem>,
    pub grid: Grid,
}

/// Everything a completed run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub plan: RunPlan,
    pub skipped: Vec<(String, SkipReason)>,
    pub summary: RasterSummary,
    pub histogram: [usize; HISTOGRAM_BINS],
    pub publish: PublishReport,
    pub zonal: Option<ZonalReport>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Nothing in the catalog passed the filters
    NoScenes,
    /// Dry run: the plan only
    Planned(RunPlan),
    Published(Box<RunReport>),
}

/// Pipeline wired to its catalog, raster backend and stores
pub struct Pipeline {
    settings: PipelineSettings,
    catalog: Arc<dyn SceneCatalog>,
    io: Arc<dyn RasterIo>,
    polygons: Arc<dyn PolygonStore>,
    stats: Arc<dyn ZonalStatsStore>,
    retry: RetryPolicy,
    writer: AtomicWriter,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        catalog: Arc<dyn SceneCatalog>,
        io: Arc<dyn RasterIo>,
        polygons: Arc<dyn PolygonStore>,
        stats: Arc<dyn ZonalStatsStore>,
    ) -> Self {
        Self {
            settings,
            catalog,
            io,
            polygons,
            stats,
            retry: RetryPolicy::default(),
            writer: AtomicWriter::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_writer(mut self, writer: AtomicWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Zonal engine configured from the run settings
    pub fn zonal_engine(&self) -> ZonalEngine {
        ZonalEngine::new(Arc::clone(&self.io), Arc::clone(&self.polygons), Arc::clone(&self.stats))
            .with_batch_size(self.settings.db_batch_size)
            .with_thumbnail_dir(self.settings.thumbnail_dir.clone())
    }

    pub async fn run(&self, options: &RunOptions) -> Result<RunOutcome> {
        self.run_with_progress(options, |_| {}).await
    }

    pub async fn run_with_progress<F>(&self, options: &RunOptions, mut progress: F) -> Result<RunOutcome>
    where
        F: FnMut(RunProgress),
    {
        progress(RunProgress::new(RunPhase::Planning, 0, 1, "Searching catalog"));
        let plan = match self.plan(options).await {
            Ok(plan) => plan,
            Err(e) if e.is_benign() => {
                tracing::info!("{}", e);
                return Ok(RunOutcome::NoScenes);
            }
            Err(e) => return Err(e),
        };
        progress(RunProgress::new(
            RunPhase::Planning,
            1,
            1,
            format!("{} of {} scenes selected", plan.selected.len(), plan.candidates),
        ));

        if options.dry_run {
            return Ok(RunOutcome::Planned(plan));
        }

        let fetcher =
            BandFetcher::new(Arc::clone(&self.io), self.settings.band_keys.clone()).with_retry(self.retry);
        let processor = SceneProcessor::new(
            fetcher,
            QualityMasker::new(self.settings.invalid_classes, self.settings.cloud_buffer_px),
            self.settings.min_valid_fraction,
        );

        let mut compositor = Compositor::new(self.settings.composite_method, plan.grid.shape());
        let mut used = Vec::new();
        let mut skipped = Vec::new();
        let total = plan.selected.len();

        for (i, item) in plan.selected.iter().enumerate() {
            progress(RunProgress::new(RunPhase::ProcessingScenes, i, total, item.id.clone()));
            match self.sign(item).await {
                Ok(signed) => match processor.process(&signed, &plan.grid).await? {
                    SceneOutcome::Kept(scene) => {
                        used.push(UsedScene { item_id: scene.item_id, datetime: scene.datetime });
                        compositor.add(scene.data)?;
                    }
                    SceneOutcome::Skipped { item_id, reason } => skipped.push((item_id, reason)),
                },
                Err(reason) => skipped.push((item.id.clone(), reason)),
            }
        }
        progress(RunProgress::new(RunPhase::ProcessingScenes, total, total, "Scenes processed"));

        progress(RunProgress::new(RunPhase::Compositing, 0, 1, self.settings.composite_method.to_string()));
        let kept = compositor.scenes();
        let composite = compositor.finish().ok_or(CanopyError::EmptyComposite { scenes: kept })?;
        let summary =
            RasterSummary::of(&composite).ok_or(CanopyError::EmptyComposite { scenes: kept })?;
        let bins = histogram(&composite);
        tracing::info!(scenes = kept, skipped = skipped.len(), summary = %summary, "Composite ready");
        tracing::debug!(histogram = ?bins, "Composite histogram over [-1, 1]");
        progress(RunProgress::new(RunPhase::Compositing, 1, 1, format!("{} scenes", kept)));

        progress(RunProgress::new(RunPhase::Publishing, 0, 1, "Writing artifacts"));
        let provenance = Provenance::from_settings(
            &self.settings,
            plan.window.interval(),
            used,
            skipped.len(),
        );
        let publisher = ArtifactPublisher::new(
            Arc::clone(&self.io),
            self.settings.output_dir.clone(),
            self.settings.artifact_prefix.clone(),
            self.settings.max_dim,
        )?
        .with_writer(self.writer);
        let raster = SourceRaster::new(plan.grid, composite);
        let publish = publisher.publish(&raster, &provenance, options.now).await?;
        progress(RunProgress::new(RunPhase::Publishing, 1, 1, publish.metadata.tag()));

        let zonal = if options.skip_zonal {
            None
        } else if !publish.native_published() {
            tracing::warn!(path = %publish.native_path().display(), "Native raster not in place, zonal statistics skipped");
            None
        } else {
            let target = ZonalTarget::register(
                self.stats.as_ref(),
                &publish.metadata,
                &publish.native_grid,
                &self.settings.output_dir,
            )
            .await?;
            Some(self.zonal_engine().run_with_progress(&target, &mut progress).await?)
        };

        Ok(RunOutcome::Published(Box::new(RunReport {
            plan,
            skipped,
            summary,
            histogram: bins,
            publish,
            zonal,
        })))
    }

    /// Load the ROI, search and select scenes, and derive the grid
    pub async fn plan(&self, options: &RunOptions) -> Result<RunPlan> {
        let roi = load_roi(&self.settings.roi_path)?;
        let geometry = reproject_geometry(&roi.geometry, &roi.crs, &Crs::wgs84())?;
        let roi_bbox = geometry.bbox().ok_or_else(|| CanopyError::InvalidRoi {
            path: self.settings.roi_path.clone(),
            reason: "region of interest has no vertices".to_string(),
        })?;

        let bbox_4326 = match options.test_bbox {
            Some((fraction, anchor)) => {
                let sub = roi_bbox.sub_box(fraction, anchor)?;
                tracing::info!(fraction, anchor = ?anchor, bbox = ?sub.to_array(), "Using test sub-box of the ROI");
                sub
            }
            None => roi_bbox,
        };

        let window = SearchWindow::ending_at(options.now, self.settings.lookback_days);
        let query = SceneQuery {
            collection: self.settings.collection.clone(),
            bbox: bbox_4326,
            geometry: Some(bbox_4326.to_geometry()),
            window,
            limit: self.settings.fetch_limit,
        };
        let items = self.catalog.search(&query).await?;
        let candidates = items.len();
        tracing::info!(candidates, window = %window, "Catalog search complete");

        let selected = select_scenes(items, &SelectionCriteria::from(&self.settings))?;
        for item in &selected {
            tracing::info!(
                item_id = %item.id,
                tile = %item.tile_id,
                cloud_cover = item.cloud_cover,
                date = %item.date_label(),
                "Selected scene"
            );
        }

        if selected.is_empty() {
            return Err(CanopyError::NoCandidateScenes);
        }
        let dst_epsg = self.native_epsg(&selected).await?;
        let grid = build_grid(
            &bbox_4326,
            &GridSpec {
                resolution_m: self.settings.resolution_m,
                max_dim: self.settings.max_dim,
                dst_epsg,
            },
        )?;
        tracing::info!(epsg = grid.epsg, width = grid.width, height = grid.height, "Destination grid");

        Ok(RunPlan { bbox_4326, window, candidates, selected, grid })
    }

    /// CRS of the first selected scene that reports one, from its catalog
    /// entry or else its red band
    async fn native_epsg(&self, selected: &[CatalogItem]) -> Result<u32> {
        let fetcher = BandFetcher::new(Arc::clone(&self.io), self.settings.band_keys.clone());
        let mut last_error = None;

        for item in selected {
            if let Some(epsg) = item.epsg {
                return Ok(epsg);
            }
            let Ok(signed) = self.sign(item).await else {
                continue;
            };
            match fetcher.native_epsg(&signed).await {
                Ok(epsg) => return Ok(epsg),
                Err(e) => {
                    tracing::warn!(item_id = %item.id, error = %e, "Could not read scene CRS, trying next scene");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CanopyError::Raster("no selected scene reports its CRS".to_string())
        }))
    }

    async fn sign(&self, item: &CatalogItem) -> std::result::Result<CatalogItem, SkipReason> {
        let keys = &self.settings.band_keys;
        let asset_keys = [keys.red.as_str(), keys.nir.as_str(), keys.classification.as_str()];
        self.catalog.sign(item, &asset_keys).await.map_err(|e| {
            tracing::warn!(item_id = %item.id, error = %e, "Signing failed, scene skipped");
            SkipReason::BandUnavailable { band: "*".to_string(), reason: e.to_string() }
        })
    }
}
