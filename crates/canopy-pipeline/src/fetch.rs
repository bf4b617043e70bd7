//! Band fetching with bounded retries.

use canopy_core::error::{CanopyError, Result};
use canopy_core::models::{BandKeys, BandRole, CatalogItem, Grid};
use canopy_raster::{RasterIo, Resampling};
use ndarray::Array2;
use std::sync::Arc;
use std::time::Duration;

/// Exponential backoff schedule for transient read failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 4, base_delay: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    /// Delay before `attempt` (1-based); none before the first
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_delay.saturating_mul(1u32 << (attempt - 2).min(16))
    }
}

/// Reads scene bands onto the destination grid
#[derive(Clone)]
pub struct BandFetcher {
    io: Arc<dyn RasterIo>,
    keys: BandKeys,
    retry: RetryPolicy,
    read_timeout: Duration,
}

/// Longest a single band read may take before it counts as failed
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

impl BandFetcher {
    pub fn new(io: Arc<dyn RasterIo>, keys: BandKeys) -> Self {
        Self { io, keys, retry: RetryPolicy::default(), read_timeout: DEFAULT_READ_TIMEOUT }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn keys(&self) -> &BandKeys {
        &self.keys
    }

    /// Read one band of `item`.
    ///
    /// `Ok(None)` only for a missing classification asset; a missing or
    /// unreadable red or NIR band is `BandUnavailable`.
    pub async fn fetch(
        &self,
        item: &CatalogItem,
        role: BandRole,
        grid: &Grid,
    ) -> Result<Option<Array2<f32>>> {
        let key = self.keys.key(role);
        let Some(href) = item.asset_href(key) else {
            if role.is_categorical() {
                tracing::warn!(item_id = %item.id, band = key, "Classification band missing, scene left unmasked");
                return Ok(None);
            }
            return Err(CanopyError::BandUnavailable {
                item_id: item.id.clone(),
                band: key.to_string(),
                reason: "asset not listed in catalog item".to_string(),
            });
        };

        let resampling = Resampling::for_role(role);
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts.max(1) {
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.read(href, grid, resampling).await {
                Ok(data) => {
                    tracing::debug!(item_id = %item.id, band = key, attempt, "Band read");
                    return Ok(Some(data));
                }
                Err(e) => {
                    tracing::warn!(item_id = %item.id, band = key, attempt, error = %e, "Band read failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(CanopyError::BandUnavailable {
            item_id: item.id.clone(),
            band: key.to_string(),
            reason: format!("{} attempts failed: {}", self.retry.max_attempts, last_error),
        })
    }

    /// Native EPSG of the item, from the catalog or else its red band
    pub async fn native_epsg(&self, item: &CatalogItem) -> Result<u32> {
        if let Some(epsg) = item.epsg {
            return Ok(epsg);
        }

        let key = self.keys.key(BandRole::Red);
        let href = item.asset_href(key).ok_or_else(|| CanopyError::BandUnavailable {
            item_id: item.id.clone(),
            band: key.to_string(),
            reason: "asset not listed in catalog item".to_string(),
        })?;

        let io = Arc::clone(&self.io);
        let owned = href.to_string();
        self.bounded(href, move || io.band_epsg(&owned)).await
    }

    async fn read(&self, href: &str, grid: &Grid, resampling: Resampling) -> Result<Array2<f32>> {
        let io = Arc::clone(&self.io);
        let owned = href.to_string();
        let grid = *grid;
        self.bounded(href, move || io.read_onto_grid(&owned, &grid, resampling)).await
    }

    /// Run a blocking read, failing once `read_timeout` has passed.
    ///
    /// A read that times out keeps its blocking thread until the backend
    /// returns; its result is discarded.
    async fn bounded<T, F>(&self, href: &str, read: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        match tokio::time::timeout(self.read_timeout, tokio::task::spawn_blocking(read)).await {
            Ok(joined) => {
                joined.map_err(|e| CanopyError::Raster(format!("Band reader task failed: {}", e)))?
            }
            Err(_) => Err(CanopyError::Raster(format!(
                "read of {} timed out after {:?}",
                href, self.read_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::models::GeoTransform;
    use canopy_raster::{MemoryRasterIo, SourceRaster};
    use ndarray::array;
    use std::collections::BTreeMap;

    fn grid() -> Grid {
        Grid::new(32630, GeoTransform::new(0.0, 20.0, 10.0, -10.0), 2, 2)
    }

    fn item(assets: &[(&str, &str)]) -> CatalogItem {
        CatalogItem {
            id: "S2A_T30TVK".to_string(),
            collection: None,
            datetime: None,
            cloud_cover: 5.0,
            tile_id: "30TVK".to_string(),
            epsg: None,
            assets: assets
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy { max_attempts: 4, base_delay: Duration::from_millis(1) }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_before(4), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let io = MemoryRasterIo::new();
        io.insert_source("mem://b04", SourceRaster::new(grid(), array![[1.0, 2.0], [3.0, 4.0]]))
            .unwrap();
        io.fail_next("mem://b04", 3).unwrap();

        let fetcher = BandFetcher::new(Arc::new(io.clone()), BandKeys::default()).with_retry(fast());
        let data = fetcher.fetch(&item(&[("B04", "mem://b04")]), BandRole::Red, &grid()).await;

        assert!(data.unwrap().is_some());
        assert_eq!(io.read_count("mem://b04"), 4);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_band_unavailable() {
        let io = MemoryRasterIo::new();
        io.insert_source("mem://b08", SourceRaster::new(grid(), array![[1.0, 2.0], [3.0, 4.0]]))
            .unwrap();
        io.fail_next("mem://b08", 10).unwrap();

        let fetcher = BandFetcher::new(Arc::new(io.clone()), BandKeys::default()).with_retry(fast());
        let result = fetcher.fetch(&item(&[("B08", "mem://b08")]), BandRole::Nir, &grid()).await;

        assert!(matches!(result, Err(CanopyError::BandUnavailable { .. })));
        assert_eq!(io.read_count("mem://b08"), 4);
    }

    #[tokio::test]
    async fn test_stalled_read_times_out_and_is_retried() {
        let io = MemoryRasterIo::new();
        io.insert_source("mem://b04", SourceRaster::new(grid(), array![[1.0, 2.0], [3.0, 4.0]]))
            .unwrap();
        io.stall_reads("mem://b04", Duration::from_millis(500)).unwrap();

        let fetcher = BandFetcher::new(Arc::new(io.clone()), BandKeys::default())
            .with_retry(RetryPolicy { max_attempts: 2, base_delay: Duration::from_millis(1) })
            .with_read_timeout(Duration::from_millis(50));
        let result = fetcher.fetch(&item(&[("B04", "mem://b04")]), BandRole::Red, &grid()).await;

        match result {
            Err(CanopyError::BandUnavailable { reason, .. }) => assert!(reason.contains("timed out")),
            other => panic!("expected a timed out band, got {:?}", other.map(|d| d.is_some())),
        }
        assert_eq!(io.read_count("mem://b04"), 2);
    }

    #[tokio::test]
    async fn test_missing_assets() {
        let fetcher = BandFetcher::new(Arc::new(MemoryRasterIo::new()), BandKeys::default());
        let empty = item(&[]);

        assert!(fetcher.fetch(&empty, BandRole::Classification, &grid()).await.unwrap().is_none());
        assert!(matches!(
            fetcher.fetch(&empty, BandRole::Red, &grid()).await,
            Err(CanopyError::BandUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_native_epsg_falls_back_to_band() {
        let io = MemoryRasterIo::new();
        let utm31 = Grid::new(32631, GeoTransform::new(0.0, 20.0, 10.0, -10.0), 2, 2);
        io.insert_source("mem://b04", SourceRaster::new(utm31, array![[1.0, 2.0], [3.0, 4.0]]))
            .unwrap();
        let fetcher = BandFetcher::new(Arc::new(io), BandKeys::default());

        let mut scene = item(&[("B04", "mem://b04")]);
        assert_eq!(fetcher.native_epsg(&scene).await.unwrap(), 32631);

        scene.epsg = Some(32630);
        assert_eq!(fetcher.native_epsg(&scene).await.unwrap(), 32630);
    }
}
