use async_trait::async_trait;
use canopy_core::error::Result;
use canopy_core::models::{ArtifactId, ArtifactRecord, PolygonRecord, ZonalStatRow};

/// Port for the externally owned land-parcel polygons
#[async_trait]
pub trait PolygonStore: Send + Sync {
    /// Every polygon with a geometry, ordered by id
    async fn list_polygons(&self) -> Result<Vec<PolygonRecord>>;
}

/// Open write transaction scoped to one artifact
#[async_trait]
pub trait ZonalWriteTx: Send {
    /// Insert or overwrite rows keyed by `(artifact_id, polygon_id, index_type)`
    ///
    /// Returns the number of rows written.
    async fn upsert_rows(&mut self, rows: &[ZonalStatRow]) -> Result<usize>;

    /// Make every upsert of this transaction visible
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every upsert of this transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Port for the artifact registry and the zonal statistics table
#[async_trait]
pub trait ZonalStatsStore: Send + Sync {
    /// Register a published raster; the same path always yields the same id
    async fn register_artifact(&self, record: &ArtifactRecord) -> Result<ArtifactId>;

    async fn find_artifact(&self, path: &str) -> Result<Option<ArtifactId>>;

    /// Begin the write transaction for `artifact_id`
    async fn begin(&self, artifact_id: ArtifactId) -> Result<Box<dyn ZonalWriteTx>>;

    /// Committed rows of one artifact, ordered by polygon id
    async fn rows_for_artifact(&self, artifact_id: ArtifactId) -> Result<Vec<ZonalStatRow>>;
}
