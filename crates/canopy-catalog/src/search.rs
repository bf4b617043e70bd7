//! Scene catalog port and its STAC and fixed-list implementations.

use crate::client::{StacCatalog, StacClient, StacClientOptions};
use crate::models::StacSearchParams;
use async_trait::async_trait;
use canopy_core::error::Result;
use canopy_core::models::{BBox, CatalogItem, Geometry};
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Closed acquisition interval searched in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SearchWindow {
    /// `[end - lookback_days, end]`
    pub fn ending_at(end: DateTime<Utc>, lookback_days: u32) -> Self {
        Self {
            start: end - Duration::days(i64::from(lookback_days)),
            end,
        }
    }

    /// RFC 3339 interval `start/end` as STAC expects it
    pub fn interval(&self) -> String {
        let fmt = "%Y-%m-%dT%H:%M:%SZ";
        format!("{}/{}", self.start.format(fmt), self.end.format(fmt))
    }
}

impl fmt::Display for SearchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.interval())
    }
}

/// What to look for in the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct SceneQuery {
    pub collection: String,
    /// Geographic footprint (EPSG:4326)
    pub bbox: BBox,
    /// Footprint polygon for an `intersects` search, when available
    pub geometry: Option<Geometry>,
    pub window: SearchWindow,
    pub limit: usize,
}

/// Source of candidate scenes
#[async_trait]
pub trait SceneCatalog: Send + Sync {
    /// Items of the query's collection acquired inside its window
    async fn search(&self, query: &SceneQuery) -> Result<Vec<CatalogItem>>;

    /// Copy of `item` whose listed assets can be read directly
    async fn sign(&self, item: &CatalogItem, asset_keys: &[&str]) -> Result<CatalogItem>;
}

/// STAC API backed catalog
pub struct StacSceneCatalog {
    client: StacClient,
}

impl StacSceneCatalog {
    pub fn new(stac_url: &str, options: StacClientOptions) -> Result<Self> {
        Ok(Self {
            client: StacClient::new(StacCatalog::from_url(stac_url), options)?,
        })
    }

    pub fn catalog(&self) -> &StacCatalog {
        self.client.catalog()
    }

    fn base_params(query: &SceneQuery) -> StacSearchParams {
        let page = query.limit.clamp(1, 1000) as u32;
        StacSearchParams::new()
            .collection(query.collection.clone())
            .datetime(query.window.interval())
            .limit(page)
    }
}

#[async_trait]
impl SceneCatalog for StacSceneCatalog {
    async fn search(&self, query: &SceneQuery) -> Result<Vec<CatalogItem>> {
        let base = Self::base_params(query);

        if let Some(geometry) = &query.geometry {
            let params = base.clone().intersects(geometry.to_geojson());
            match self.client.search_all(&params).await {
                Ok(items) if !items.is_empty() => {
                    return Ok(items.iter().map(|i| i.to_catalog_item()).collect());
                }
                Ok(_) => tracing::info!("Intersects search returned nothing, retrying with bbox"),
                Err(e) => tracing::warn!(error = %e, "Intersects search failed, retrying with bbox"),
            }
        }

        let params = base.bbox(query.bbox.to_array());
        let items = self.client.search_all(&params).await?;
        Ok(items.iter().map(|i| i.to_catalog_item()).collect())
    }

    async fn sign(&self, item: &CatalogItem, asset_keys: &[&str]) -> Result<CatalogItem> {
        let mut signed = item.clone();
        if !self.client.catalog().needs_signing() {
            return Ok(signed);
        }

        for key in asset_keys {
            if let Some(href) = signed.assets.get_mut(*key) {
                *href = self.client.sign_href(href).await?;
            }
        }
        Ok(signed)
    }
}

/// Catalog answering every query with a fixed list of items
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    items: Vec<CatalogItem>,
}

impl StaticCatalog {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl SceneCatalog for StaticCatalog {
    async fn search(&self, query: &SceneQuery) -> Result<Vec<CatalogItem>> {
        Ok(self.items.iter().take(query.limit).cloned().collect())
    }

    async fn sign(&self, item: &CatalogItem, _asset_keys: &[&str]) -> Result<CatalogItem> {
        Ok(item.clone())
    }
}
