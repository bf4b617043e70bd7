//! In-memory storage implementations for development and testing.
//!
//! Zonal writes are staged inside the transaction and only applied to the
//! shared maps on commit, so a rollback simply drops the stage.

use async_trait::async_trait;
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::{ArtifactId, ArtifactRecord, PolygonId, PolygonRecord, ZonalStatRow};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use crate::ports::{PolygonStore, ZonalStatsStore, ZonalWriteTx};

fn lock_err(e: impl std::fmt::Display) -> CanopyError {
    CanopyError::Store(format!("Failed to acquire lock: {}", e))
}

/// In-memory implementation of PolygonStore
#[derive(Debug, Clone, Default)]
pub struct MemoryPolygonStore {
    polygons: Arc<RwLock<BTreeMap<PolygonId, PolygonRecord>>>,
}

impl MemoryPolygonStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_polygons(polygons: impl IntoIterator<Item = PolygonRecord>) -> Result<Self> {
        let store = Self::new();
        for polygon in polygons {
            store.insert(polygon)?;
        }
        Ok(store)
    }

    pub fn insert(&self, polygon: PolygonRecord) -> Result<()> {
        self.polygons.write().map_err(lock_err)?.insert(polygon.id, polygon);
        Ok(())
    }
}

#[async_trait]
impl PolygonStore for MemoryPolygonStore {
    async fn list_polygons(&self) -> Result<Vec<PolygonRecord>> {
        Ok(self.polygons.read().map_err(lock_err)?.values().cloned().collect())
    }
}

type RowKey = (ArtifactId, PolygonId, String);

/// In-memory implementation of ZonalStatsStore
#[derive(Debug, Clone, Default)]
pub struct MemoryZonalStore {
    artifacts: Arc<RwLock<HashMap<ArtifactId, ArtifactRecord>>>,
    rows: Arc<RwLock<HashMap<RowKey, ZonalStatRow>>>,
    next_id: Arc<RwLock<i64>>,
    failing_upsert: Arc<Mutex<Option<usize>>>,
}

impl MemoryZonalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th upsert call from now fail (1-based), for exercising rollback
    pub fn fail_upsert_call(&self, n: usize) -> Result<()> {
        *self.failing_upsert.lock().map_err(lock_err)? = Some(n);
        Ok(())
    }

    pub fn artifact(&self, id: ArtifactId) -> Result<Option<ArtifactRecord>> {
        Ok(self.artifacts.read().map_err(lock_err)?.get(&id).cloned())
    }

    /// Total committed rows across all artifacts
    pub fn row_count(&self) -> Result<usize> {
        Ok(self.rows.read().map_err(lock_err)?.len())
    }

    fn tick_failure(&self) -> Result<bool> {
        let mut failing = self.failing_upsert.lock().map_err(lock_err)?;
        match failing.as_mut() {
            Some(1) => {
                *failing = None;
                Ok(true)
            }
            Some(n) => {
                *n -= 1;
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

/// Staged write transaction for MemoryZonalStore
pub struct MemoryZonalTx {
    artifact_id: ArtifactId,
    staged: Vec<ZonalStatRow>,
    store: MemoryZonalStore,
}

#[async_trait]
impl ZonalWriteTx for MemoryZonalTx {
    async fn upsert_rows(&mut self, rows: &[ZonalStatRow]) -> Result<usize> {
        if self.store.tick_failure()? {
            return Err(CanopyError::Store("simulated upsert failure".to_string()));
        }
        if let Some(row) = rows.iter().find(|r| r.artifact_id != self.artifact_id) {
            return Err(CanopyError::Store(format!(
                "row for artifact {} written in transaction for artifact {}",
                row.artifact_id, self.artifact_id
            )));
        }
        self.staged.extend_from_slice(rows);
        Ok(rows.len())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryZonalTx { staged, store, .. } = *self;
        let mut committed = store.rows.write().map_err(lock_err)?;
        for row in staged {
            let key = (row.artifact_id, row.polygon_id, row.index_type.clone());
            committed.insert(key, row);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        tracing::debug!(
            artifact_id = %self.artifact_id,
            discarded = self.staged.len(),
            "Rolled back staged zonal rows"
        );
        Ok(())
    }
}

#[async_trait]
impl ZonalStatsStore for MemoryZonalStore {
    async fn register_artifact(&self, record: &ArtifactRecord) -> Result<ArtifactId> {
        let mut artifacts = self.artifacts.write().map_err(lock_err)?;
        if let Some((id, existing)) = artifacts.iter_mut().find(|(_, a)| a.path == record.path) {
            *existing = record.clone();
            return Ok(*id);
        }

        let mut next_id = self.next_id.write().map_err(lock_err)?;
        *next_id += 1;
        let id = ArtifactId(*next_id);
        artifacts.insert(id, record.clone());
        Ok(id)
    }

    async fn find_artifact(&self, path: &str) -> Result<Option<ArtifactId>> {
        let artifacts = self.artifacts.read().map_err(lock_err)?;
        Ok(artifacts.iter().find(|(_, a)| a.path == path).map(|(id, _)| *id))
    }

    async fn begin(&self, artifact_id: ArtifactId) -> Result<Box<dyn ZonalWriteTx>> {
        if !self.artifacts.read().map_err(lock_err)?.contains_key(&artifact_id) {
            return Err(CanopyError::Store(format!("unknown artifact {}", artifact_id)));
        }
        Ok(Box::new(MemoryZonalTx { artifact_id, staged: Vec::new(), store: self.clone() }))
    }

    async fn rows_for_artifact(&self, artifact_id: ArtifactId) -> Result<Vec<ZonalStatRow>> {
        let rows = self.rows.read().map_err(lock_err)?;
        let mut found: Vec<ZonalStatRow> =
            rows.values().filter(|r| r.artifact_id == artifact_id).cloned().collect();
        found.sort_by(|a, b| a.polygon_id.cmp(&b.polygon_id).then(a.index_type.cmp(&b.index_type)));
        Ok(found)
    }
}
