pub mod artifact;
pub mod geometry;
pub mod grid;
pub mod quality;
pub mod scene;
pub mod zonal;

pub use artifact::{ArtifactFiles, ArtifactId, ArtifactMetadata, ArtifactRecord};
pub use geometry::{BBox, BBoxAnchor, Crs, Geometry, Roi};
pub use grid::{GeoTransform, Grid, Window};
pub use quality::InvalidClasses;
pub use scene::{BandKeys, BandRole, CatalogItem, CompositeMethod, SelectionPolicy, SkipReason};
pub use zonal::{
    PolygonId, PolygonRecord, PolygonSkip, ZonalCounters, ZonalStatRow, ZonalStats,
    INDEX_TYPE_NDVI,
};
