//! Canopy Core - Domain models, error taxonomy, and configuration
//!
//! This crate holds the types shared by every stage of the compositing and
//! zonal-statistics pipeline: grids, catalog items, artifacts, zonal rows,
//! and the layered run configuration.

pub mod config;
pub mod error;
pub mod models;
pub mod roi;

pub use error::{CanopyError, Result};
