//! Choosing which catalog items feed the composite.
//!
//! Items over the cloud ceiling are dropped, the rest are ranked inside each
//! tile by the selection policy and capped per tile, and tiles are then
//! concatenated in ascending tile-id order up to the total cap.

use canopy_core::config::PipelineSettings;
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::{CatalogItem, SelectionPolicy};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionCriteria {
    /// Maximum cloud cover, percent, inclusive
    pub cloud_ceiling: f64,
    pub per_tile: usize,
    pub max_items_total: usize,
    pub policy: SelectionPolicy,
}

impl From<&PipelineSettings> for SelectionCriteria {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            cloud_ceiling: settings.cloud_ceiling,
            per_tile: settings.per_tile,
            max_items_total: settings.max_items_total,
            policy: settings.selection_policy,
        }
    }
}

fn by_cloud(a: &CatalogItem, b: &CatalogItem) -> Ordering {
    a.cloud_cover.total_cmp(&b.cloud_cover)
}

// undated items rank as the oldest
fn newest_first(a: &CatalogItem, b: &CatalogItem) -> Ordering {
    b.datetime.cmp(&a.datetime)
}

fn rank(policy: SelectionPolicy, a: &CatalogItem, b: &CatalogItem) -> Ordering {
    let primary = match policy {
        SelectionPolicy::CloudThenRecency => by_cloud(a, b).then_with(|| newest_first(a, b)),
        SelectionPolicy::RecencyFirst => newest_first(a, b).then_with(|| by_cloud(a, b)),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

/// Pick the scenes to composite; fails with `NoCandidateScenes` when none
/// survive the filters
pub fn select_scenes(items: Vec<CatalogItem>, criteria: &SelectionCriteria) -> Result<Vec<CatalogItem>> {
    let found = items.len();
    let mut candidates: Vec<CatalogItem> = items
        .into_iter()
        .filter(|item| item.cloud_cover <= criteria.cloud_ceiling)
        .collect();
    candidates.sort_by(|a, b| rank(criteria.policy, a, b));

    let mut by_tile: BTreeMap<String, Vec<CatalogItem>> = BTreeMap::new();
    for item in candidates {
        let slot = by_tile.entry(item.tile_id.clone()).or_default();
        if slot.len() < criteria.per_tile {
            slot.push(item);
        }
    }

    let tiles = by_tile.len();
    let mut selected: Vec<CatalogItem> = by_tile.into_values().flatten().collect();
    selected.truncate(criteria.max_items_total);

    tracing::info!(
        found,
        tiles,
        selected = selected.len(),
        cloud_ceiling = criteria.cloud_ceiling,
        "Scene selection complete"
    );

    if selected.is_empty() {
        return Err(CanopyError::NoCandidateScenes);
    }
    Ok(selected)
}
