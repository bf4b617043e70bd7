//! Error types for Canopy

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanopyError {
    // Input errors
    #[error("Invalid region of interest at {path}: {reason}")]
    InvalidRoi { path: PathBuf, reason: String },

    #[error("Invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("Projection from EPSG:{from} to EPSG:{to} failed: {reason}")]
    Projection { from: u32, to: u32, reason: String },

    // Selection errors
    #[error("No candidate scenes matched the search window and filters")]
    NoCandidateScenes,

    #[error("Catalog request failed: {0}")]
    Catalog(String),

    // Per-scene errors
    #[error("Band {band} unavailable for item {item_id}: {reason}")]
    BandUnavailable {
        item_id: String,
        band: String,
        reason: String,
    },

    #[error("Raster error: {0}")]
    Raster(String),

    // Composite errors
    #[error("Composite has no finite pixels ({scenes} scene(s) kept)")]
    EmptyComposite { scenes: usize },

    // Publication errors
    #[error("Failed to publish {path}: {reason}")]
    Publish { path: PathBuf, reason: String },

    // Persistence errors
    #[error("Store error: {0}")]
    Store(String),

    // Configuration errors
    #[error("Missing required configuration: {key}")]
    ConfigMissing { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CanopyError {
    /// Whether the run should end cleanly instead of failing.
    pub fn is_benign(&self) -> bool {
        matches!(self, CanopyError::NoCandidateScenes)
    }
}

impl From<serde_json::Error> for CanopyError {
    fn from(err: serde_json::Error) -> Self {
        CanopyError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CanopyError>;
