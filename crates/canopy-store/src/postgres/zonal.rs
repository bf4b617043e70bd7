use async_trait::async_trait;
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::{ArtifactId, ArtifactRecord, PolygonId, ZonalStatRow};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};

use super::transaction::TimedTransaction;
use super::PostgresStore;
use crate::ports::{ZonalStatsStore, ZonalWriteTx};

/// Rows per INSERT statement; 13 binds each stays well under the protocol limit
const ROWS_PER_STATEMENT: usize = 1000;

fn store_err(context: &str, e: impl std::fmt::Display) -> CanopyError {
    CanopyError::Store(format!("{}: {}", context, e))
}

/// Zonal write transaction on PostgreSQL
pub struct PgZonalTx {
    tx: TimedTransaction,
    artifact_id: ArtifactId,
}

#[async_trait]
impl ZonalWriteTx for PgZonalTx {
    async fn upsert_rows(&mut self, rows: &[ZonalStatRow]) -> Result<usize> {
        if let Some(row) = rows.iter().find(|r| r.artifact_id != self.artifact_id) {
            return Err(CanopyError::Store(format!(
                "row for artifact {} written in transaction for artifact {}",
                row.artifact_id, self.artifact_id
            )));
        }

        let mut written = 0;
        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO canopy_zonal_stats (artifact_id, polygon_id, index_type, computed_at, \
                 index_observation_date, crs_epsg, resolution_m, mean, min, max, std, \
                 artifact_path, visualization_path) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.artifact_id.0)
                    .push_bind(row.polygon_id.0)
                    .push_bind(&row.index_type)
                    .push_bind(row.computed_at)
                    .push_bind(row.index_observation_date)
                    .push_bind(row.crs_epsg as i32)
                    .push_bind(row.resolution_m)
                    .push_bind(row.mean)
                    .push_bind(row.min)
                    .push_bind(row.max)
                    .push_bind(row.std)
                    .push_bind(&row.artifact_path)
                    .push_bind(&row.visualization_path);
            });
            builder.push(
                " ON CONFLICT (artifact_id, polygon_id, index_type) DO UPDATE SET \
                 computed_at = EXCLUDED.computed_at, \
                 index_observation_date = EXCLUDED.index_observation_date, \
                 crs_epsg = EXCLUDED.crs_epsg, \
                 resolution_m = EXCLUDED.resolution_m, \
                 mean = EXCLUDED.mean, min = EXCLUDED.min, max = EXCLUDED.max, std = EXCLUDED.std, \
                 artifact_path = EXCLUDED.artifact_path, \
                 visualization_path = EXCLUDED.visualization_path",
            );

            let conn = self.tx.inner_mut()?;
            let result = builder
                .build()
                .execute(&mut **conn)
                .await
                .map_err(|e| store_err("Failed to upsert zonal statistics", e))?;
            written += result.rows_affected() as usize;
        }

        Ok(written)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await
    }
}

fn row_to_stat(row: &PgRow) -> Result<ZonalStatRow> {
    let get_err = |e: sqlx::Error| store_err("Invalid zonal statistics row", e);
    Ok(ZonalStatRow {
        artifact_id: ArtifactId(row.try_get("artifact_id").map_err(get_err)?),
        polygon_id: PolygonId(row.try_get("polygon_id").map_err(get_err)?),
        index_type: row.try_get("index_type").map_err(get_err)?,
        computed_at: row.try_get("computed_at").map_err(get_err)?,
        index_observation_date: row.try_get("index_observation_date").map_err(get_err)?,
        crs_epsg: row.try_get::<i32, _>("crs_epsg").map_err(get_err)? as u32,
        resolution_m: row.try_get("resolution_m").map_err(get_err)?,
        mean: row.try_get("mean").map_err(get_err)?,
        min: row.try_get("min").map_err(get_err)?,
        max: row.try_get("max").map_err(get_err)?,
        std: row.try_get("std").map_err(get_err)?,
        artifact_path: row.try_get("artifact_path").map_err(get_err)?,
        visualization_path: row.try_get("visualization_path").map_err(get_err)?,
    })
}

#[async_trait]
impl ZonalStatsStore for PostgresStore {
    async fn register_artifact(&self, record: &ArtifactRecord) -> Result<ArtifactId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO canopy_artifacts
                (origin, acquisition_date, epsg, sensor_description, resolution_m,
                 min_x, min_y, max_x, max_y, path)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (path) DO UPDATE SET
                acquisition_date = EXCLUDED.acquisition_date,
                sensor_description = EXCLUDED.sensor_description
            RETURNING id
            "#,
        )
        .bind(&record.origin)
        .bind(record.acquisition_date)
        .bind(record.epsg as i32)
        .bind(&record.sensor_description)
        .bind(record.resolution_m)
        .bind(record.bbox.min_x)
        .bind(record.bbox.min_y)
        .bind(record.bbox.max_x)
        .bind(record.bbox.max_y)
        .bind(&record.path)
        .fetch_one(self.pool())
        .await
        .map_err(|e| store_err("Failed to register artifact", e))?;

        tracing::debug!(artifact_id = id, path = %record.path, "Artifact registered");
        Ok(ArtifactId(id))
    }

    async fn find_artifact(&self, path: &str) -> Result<Option<ArtifactId>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM canopy_artifacts WHERE path = $1")
            .bind(path)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| store_err("Failed to look up artifact", e))?;
        Ok(id.map(ArtifactId))
    }

    async fn begin(&self, artifact_id: ArtifactId) -> Result<Box<dyn ZonalWriteTx>> {
        let tx = TimedTransaction::begin(self.pool(), self.config().transaction_timeout).await?;
        Ok(Box::new(PgZonalTx { tx, artifact_id }))
    }

    async fn rows_for_artifact(&self, artifact_id: ArtifactId) -> Result<Vec<ZonalStatRow>> {
        let rows = sqlx::query(
            r#"
            SELECT artifact_id, polygon_id, index_type, computed_at, index_observation_date,
                   crs_epsg, resolution_m, mean, min, max, std, artifact_path, visualization_path
            FROM canopy_zonal_stats
            WHERE artifact_id = $1
            ORDER BY polygon_id, index_type
            "#,
        )
        .bind(artifact_id.0)
        .fetch_all(self.pool())
        .await
        .map_err(|e| store_err("Failed to read zonal statistics", e))?;

        rows.iter().map(row_to_stat).collect()
    }
}
