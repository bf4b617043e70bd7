//! Canopy Catalog - STAC scene search, selection, and asset signing
//!
//! The [`search::SceneCatalog`] port hides the HTTP client; selection is a
//! pure function over catalog items.

pub mod client;
pub mod models;
pub mod search;
pub mod selection;

pub use client::{StacCatalog, StacClient, StacClientOptions};
pub use search::{SceneCatalog, SceneQuery, SearchWindow, StacSceneCatalog, StaticCatalog};
pub use selection::{select_scenes, SelectionCriteria};
