use async_trait::async_trait;
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::geometry::EPSG_WGS84;
use canopy_core::models::{PolygonId, PolygonRecord};
use sqlx::Row;

use super::PostgresStore;
use crate::ports::PolygonStore;

#[async_trait]
impl PolygonStore for PostgresStore {
    async fn list_polygons(&self) -> Result<Vec<PolygonRecord>> {
        let query = self.config().polygons.list_query();
        let rows = sqlx::query(&query)
            .fetch_all(self.pool())
            .await
            .map_err(|e| CanopyError::Store(format!("Failed to list polygons: {}", e)))?;

        rows.into_iter()
            .map(|row| {
                let id: i64 = row
                    .try_get("id")
                    .map_err(|e| CanopyError::Store(format!("Invalid polygon id: {}", e)))?;
                let geojson: String = row
                    .try_get("geojson")
                    .map_err(|e| CanopyError::Store(format!("Invalid polygon {}: {}", id, e)))?;
                let srid: i32 = row.try_get("srid").unwrap_or(0);

                Ok(PolygonRecord {
                    id: PolygonId(id),
                    geojson,
                    // an unset SRID means the geometry was loaded as lon/lat
                    srid: u32::try_from(srid).ok().filter(|s| *s > 0).unwrap_or(EPSG_WGS84),
                })
            })
            .collect()
    }
}
