//! Catalog items and per-scene processing vocabulary.

use crate::error::{CanopyError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Cloud cover assigned to items that do not report one
pub const UNKNOWN_CLOUD_COVER: f64 = 999.0;

/// Tile identifier assigned to items that do not report one
pub const UNKNOWN_TILE: &str = "UNKNOWN";

/// A scene record from the external catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub collection: Option<String>,
    pub datetime: Option<DateTime<Utc>>,
    pub cloud_cover: f64,
    pub tile_id: String,
    /// Native projection advertised by the catalog, if any
    pub epsg: Option<u32>,
    /// Asset key to href
    pub assets: BTreeMap<String, String>,
}

impl CatalogItem {
    pub fn asset_href(&self, key: &str) -> Option<&str> {
        self.assets.get(key).map(String::as_str)
    }

    /// Acquisition date formatted as `YYYY-MM-DD`, or `"unknown"`
    pub fn date_label(&self) -> String {
        self.datetime
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Per-tile ordering applied before the per-tile cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Ascending cloud cover, newest first among equals
    #[default]
    CloudThenRecency,
    /// Newest first, lowest cloud cover among equals
    RecencyFirst,
}

impl SelectionPolicy {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "cloud-then-recency" | "cloud" => Ok(SelectionPolicy::CloudThenRecency),
            "recency-first" | "recency" => Ok(SelectionPolicy::RecencyFirst),
            _ => Err(CanopyError::ConfigInvalid {
                key: "selection_policy".to_string(),
                reason: format!(
                    "Invalid selection policy: {}. Use cloud-then-recency or recency-first",
                    s
                ),
            }),
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::CloudThenRecency => write!(f, "cloud-then-recency"),
            SelectionPolicy::RecencyFirst => write!(f, "recency-first"),
        }
    }
}

/// Per-pixel temporal reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompositeMethod {
    #[default]
    Max,
    Median,
}

impl CompositeMethod {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "max" => Ok(CompositeMethod::Max),
            "median" => Ok(CompositeMethod::Median),
            _ => Err(CanopyError::ConfigInvalid {
                key: "composite_method".to_string(),
                reason: format!("Invalid composite method: {}. Use max or median", s),
            }),
        }
    }
}

impl fmt::Display for CompositeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositeMethod::Max => write!(f, "max"),
            CompositeMethod::Median => write!(f, "median"),
        }
    }
}

/// Role a band plays in index computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandRole {
    Red,
    Nir,
    Classification,
}

impl BandRole {
    /// Continuous bands are interpolated; categorical bands are not
    pub fn is_categorical(&self) -> bool {
        matches!(self, BandRole::Classification)
    }
}

/// Asset keys for each band role in the target collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandKeys {
    pub red: String,
    pub nir: String,
    pub classification: String,
}

impl Default for BandKeys {
    fn default() -> Self {
        Self {
            red: "B04".to_string(),
            nir: "B08".to_string(),
            classification: "SCL".to_string(),
        }
    }
}

impl BandKeys {
    pub fn key(&self, role: BandRole) -> &str {
        match role {
            BandRole::Red => &self.red,
            BandRole::Nir => &self.nir,
            BandRole::Classification => &self.classification,
        }
    }
}

/// Why a scene was left out of the composite
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// A required band is missing or could not be fetched
    BandUnavailable { band: String, reason: String },
    /// Too few finite index pixels after masking
    LowValidFraction { fraction: f64, minimum: f64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BandUnavailable { band, reason } => {
                write!(f, "band {} unavailable: {}", band, reason)
            }
            SkipReason::LowValidFraction { fraction, minimum } => {
                write!(f, "valid fraction {:.4} below minimum {:.4}", fraction, minimum)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selection_policy() {
        assert_eq!(
            SelectionPolicy::parse("Cloud_Then_Recency").unwrap(),
            SelectionPolicy::CloudThenRecency
        );
        assert_eq!(SelectionPolicy::parse("recency-first").unwrap(), SelectionPolicy::RecencyFirst);
        assert!(SelectionPolicy::parse("random").is_err());
    }

    #[test]
    fn test_parse_composite_method() {
        assert_eq!(CompositeMethod::parse("MEDIAN").unwrap(), CompositeMethod::Median);
        assert!(CompositeMethod::parse("mean").is_err());
        assert_eq!(CompositeMethod::Max.to_string(), "max");
    }

    #[test]
    fn test_band_keys() {
        let keys = BandKeys::default();
        assert_eq!(keys.key(BandRole::Nir), "B08");
        assert!(BandRole::Classification.is_categorical());
        assert!(!BandRole::Red.is_categorical());
    }
}
