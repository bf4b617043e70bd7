//! Canopy Geo - Geometry conversion, CRS transformation, and grid derivation
//!
//! This crate handles the vector-side geospatial work of the pipeline:
//! conversions to the `geo` crate, reprojection through PROJ, geometry
//! validation, and the destination grid builder.

pub mod grid;
pub mod models;
pub mod transform;
pub mod validation;
