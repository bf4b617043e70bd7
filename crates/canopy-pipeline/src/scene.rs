//! Per-scene band reads, quality masking and index computation.

use crate::fetch::BandFetcher;
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::{BandRole, CatalogItem, Grid, SkipReason};
use canopy_raster::quality::{valid_fraction, QualityMasker};
use chrono::{DateTime, Utc};
use ndarray::Array2;

/// Index raster of one scene that passed the valid-fraction check
#[derive(Debug, Clone)]
pub struct SceneIndex {
    pub item_id: String,
    pub datetime: Option<DateTime<Utc>>,
    pub data: Array2<f32>,
    pub valid_fraction: f64,
}

/// Result of processing one catalog item
#[derive(Debug, Clone)]
pub enum SceneOutcome {
    Kept(SceneIndex),
    Skipped { item_id: String, reason: SkipReason },
}

impl SceneOutcome {
    pub fn item_id(&self) -> &str {
        match self {
            SceneOutcome::Kept(scene) => &scene.item_id,
            SceneOutcome::Skipped { item_id, .. } => item_id,
        }
    }
}

/// Turns catalog items into index rasters on the destination grid
pub struct SceneProcessor {
    fetcher: BandFetcher,
    masker: QualityMasker,
    min_valid_fraction: f64,
}

impl SceneProcessor {
    pub fn new(fetcher: BandFetcher, masker: QualityMasker, min_valid_fraction: f64) -> Self {
        Self { fetcher, masker, min_valid_fraction }
    }

    /// Process one item.
    ///
    /// Fetch failures and sparse scenes come back as `Skipped`; an `Err`
    /// means the bands could not be combined at all.
    pub async fn process(&self, item: &CatalogItem, grid: &Grid) -> Result<SceneOutcome> {
        let red = match self.required(item, BandRole::Red, grid).await {
            Ok(data) => data,
            Err(outcome) => return Ok(outcome),
        };
        let nir = match self.required(item, BandRole::Nir, grid).await {
            Ok(data) => data,
            Err(outcome) => return Ok(outcome),
        };

        let classification = match self.fetcher.fetch(item, BandRole::Classification, grid).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "Classification band unreadable, scene left unmasked");
                None
            }
        };

        let index = self.masker.index(&red, &nir, classification.as_ref())?;
        let fraction = valid_fraction(&index);

        if fraction < self.min_valid_fraction {
            tracing::info!(
                item_id = %item.id,
                valid_fraction = fraction,
                minimum = self.min_valid_fraction,
                "Scene skipped: too few valid pixels"
            );
            return Ok(SceneOutcome::Skipped {
                item_id: item.id.clone(),
                reason: SkipReason::LowValidFraction {
                    fraction,
                    minimum: self.min_valid_fraction,
                },
            });
        }

        tracing::info!(item_id = %item.id, valid_fraction = fraction, "Scene kept");
        Ok(SceneOutcome::Kept(SceneIndex {
            item_id: item.id.clone(),
            datetime: item.datetime,
            data: index,
            valid_fraction: fraction,
        }))
    }

    async fn required(
        &self,
        item: &CatalogItem,
        role: BandRole,
        grid: &Grid,
    ) -> std::result::Result<Array2<f32>, SceneOutcome> {
        let skipped = |band: String, reason: String| {
            tracing::warn!(item_id = %item.id, band = %band, reason = %reason, "Scene skipped: band unavailable");
            SceneOutcome::Skipped {
                item_id: item.id.clone(),
                reason: SkipReason::BandUnavailable { band, reason },
            }
        };

        match self.fetcher.fetch(item, role, grid).await {
            Ok(Some(data)) => Ok(data),
            Ok(None) => Err(skipped(
                self.fetcher.keys().key(role).to_string(),
                "no data returned".to_string(),
            )),
            Err(CanopyError::BandUnavailable { band, reason, .. }) => Err(skipped(band, reason)),
            Err(e) => Err(skipped(self.fetcher.keys().key(role).to_string(), e.to_string())),
        }
    }
}
