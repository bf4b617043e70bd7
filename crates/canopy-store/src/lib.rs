//! Canopy Store - Storage ports and adapters
//!
//! Ports for reading land-parcel polygons and for writing the artifact
//! registry and zonal statistics, with in-memory and PostgreSQL adapters.

pub mod memory;
pub mod ports;
pub mod postgres;

pub use memory::{MemoryPolygonStore, MemoryZonalStore};
pub use ports::{PolygonStore, ZonalStatsStore, ZonalWriteTx};
