use crate::error::{CanopyError, Result};
use crate::models::{BandKeys, CompositeMethod, InvalidClasses, SelectionPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Planetary Computer STAC API root
pub const DEFAULT_STAC_URL: &str = "https://planetarycomputer.microsoft.com/api/stac/v1";

/// Configuration source for tracking where values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default value
    Default,
    /// Loaded from config file
    File,
    /// Loaded from environment variable
    Environment,
    /// Provided via CLI argument
    Cli,
}

impl ConfigSource {
    /// Returns the precedence level (higher = higher priority)
    pub fn precedence(&self) -> u8 {
        match self {
            ConfigSource::Default => 0,
            ConfigSource::File => 1,
            ConfigSource::Environment => 2,
            ConfigSource::Cli => 3,
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    fn default_of(value: T) -> Self {
        Self::new(value, ConfigSource::Default)
    }

    /// Update the value if the new source has higher precedence
    pub fn update(&mut self, value: T, source: ConfigSource) {
        if source.precedence() > self.source.precedence() {
            self.value = value;
            self.source = source;
        }
    }

    fn update_opt(&mut self, value: Option<T>, source: ConfigSource) {
        if let Some(value) = value {
            self.update(value, source);
        }
    }
}

/// Validated run parameters consumed by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub roi_path: PathBuf,
    pub stac_url: String,
    pub collection: String,
    pub lookback_days: u32,
    pub cloud_ceiling: f64,
    pub max_items_total: usize,
    pub per_tile: usize,
    pub fetch_limit: usize,
    pub resolution_m: f64,
    pub max_dim: usize,
    pub composite_method: CompositeMethod,
    pub min_valid_fraction: f64,
    pub selection_policy: SelectionPolicy,
    pub invalid_classes: InvalidClasses,
    pub cloud_buffer_px: usize,
    pub db_batch_size: usize,
    pub output_dir: PathBuf,
    pub artifact_prefix: String,
    pub thumbnail_dir: String,
    pub band_keys: BandKeys,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            roi_path: PathBuf::from("roi.geojson"),
            stac_url: DEFAULT_STAC_URL.to_string(),
            collection: "sentinel-2-l2a".to_string(),
            lookback_days: 12,
            cloud_ceiling: 60.0,
            max_items_total: 10,
            per_tile: 5,
            fetch_limit: 200,
            resolution_m: 10.0,
            max_dim: 12000,
            composite_method: CompositeMethod::Max,
            min_valid_fraction: 0.02,
            selection_policy: SelectionPolicy::CloudThenRecency,
            invalid_classes: InvalidClasses::default(),
            cloud_buffer_px: 0,
            db_batch_size: 500,
            output_dir: PathBuf::from("output"),
            artifact_prefix: "ndvi".to_string(),
            thumbnail_dir: "static/thumbnails".to_string(),
            band_keys: BandKeys::default(),
        }
    }
}

impl PipelineSettings {
    /// Check ranges that the type system cannot express
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_items_total", self.max_items_total),
            ("per_tile", self.per_tile),
            ("fetch_limit", self.fetch_limit),
            ("max_dim", self.max_dim),
            ("db_batch_size", self.db_batch_size),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(invalid(key, "must be greater than 0"));
            }
        }

        if self.lookback_days == 0 {
            return Err(invalid("lookback_days", "must be greater than 0"));
        }
        if !(0.0..=100.0).contains(&self.cloud_ceiling) {
            return Err(invalid("cloud_ceiling", "must be between 0 and 100"));
        }
        if !(0.0..=1.0).contains(&self.min_valid_fraction) {
            return Err(invalid("min_valid_fraction", "must be between 0 and 1"));
        }
        if !(self.resolution_m.is_finite() && self.resolution_m > 0.0) {
            return Err(invalid("resolution_m", "must be a positive number of meters"));
        }
        if self.stac_url.trim().is_empty() {
            return Err(CanopyError::ConfigMissing { key: "stac_url".to_string() });
        }
        if self.artifact_prefix.trim().is_empty() || self.artifact_prefix.contains('/') {
            return Err(invalid("artifact_prefix", "must be a non-empty file name prefix"));
        }

        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> CanopyError {
    CanopyError::ConfigInvalid { key: key.to_string(), reason: reason.to_string() }
}

/// Layered configuration for a pipeline run
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    pub roi_path: ConfigValue<PathBuf>,
    pub stac_url: ConfigValue<String>,
    pub collection: ConfigValue<String>,
    pub lookback_days: ConfigValue<u32>,
    pub cloud_ceiling: ConfigValue<f64>,
    pub max_items_total: ConfigValue<usize>,
    pub per_tile: ConfigValue<usize>,
    pub fetch_limit: ConfigValue<usize>,
    pub resolution_m: ConfigValue<f64>,
    pub max_dim: ConfigValue<usize>,
    pub composite_method: ConfigValue<CompositeMethod>,
    pub min_valid_fraction: ConfigValue<f64>,
    pub selection_policy: ConfigValue<SelectionPolicy>,
    pub invalid_classes: ConfigValue<InvalidClasses>,
    pub cloud_buffer_px: ConfigValue<usize>,
    pub db_batch_size: ConfigValue<usize>,
    pub output_dir: ConfigValue<PathBuf>,
    pub artifact_prefix: ConfigValue<String>,
    pub thumbnail_dir: ConfigValue<String>,
    pub band_red: ConfigValue<String>,
    pub band_nir: ConfigValue<String>,
    pub band_classification: ConfigValue<String>,
}

impl LayeredConfig {
    /// Create a new configuration with default values
    pub fn with_defaults() -> Self {
        let d = PipelineSettings::default();
        Self {
            roi_path: ConfigValue::default_of(d.roi_path),
            stac_url: ConfigValue::default_of(d.stac_url),
            collection: ConfigValue::default_of(d.collection),
            lookback_days: ConfigValue::default_of(d.lookback_days),
            cloud_ceiling: ConfigValue::default_of(d.cloud_ceiling),
            max_items_total: ConfigValue::default_of(d.max_items_total),
            per_tile: ConfigValue::default_of(d.per_tile),
            fetch_limit: ConfigValue::default_of(d.fetch_limit),
            resolution_m: ConfigValue::default_of(d.resolution_m),
            max_dim: ConfigValue::default_of(d.max_dim),
            composite_method: ConfigValue::default_of(d.composite_method),
            min_valid_fraction: ConfigValue::default_of(d.min_valid_fraction),
            selection_policy: ConfigValue::default_of(d.selection_policy),
            invalid_classes: ConfigValue::default_of(d.invalid_classes),
            cloud_buffer_px: ConfigValue::default_of(d.cloud_buffer_px),
            db_batch_size: ConfigValue::default_of(d.db_batch_size),
            output_dir: ConfigValue::default_of(d.output_dir),
            artifact_prefix: ConfigValue::default_of(d.artifact_prefix),
            thumbnail_dir: ConfigValue::default_of(d.thumbnail_dir),
            band_red: ConfigValue::default_of(d.band_keys.red),
            band_nir: ConfigValue::default_of(d.band_keys.nir),
            band_classification: ConfigValue::default_of(d.band_keys.classification),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| CanopyError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to read config file: {}", e),
            })?;

        let file_config: FileConfig =
            toml::from_str(&content).map_err(|e| CanopyError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to parse TOML: {}", e),
            })?;

        let src = ConfigSource::File;
        self.roi_path.update_opt(file_config.roi_path, src);
        self.stac_url.update_opt(file_config.stac_url, src);
        self.collection.update_opt(file_config.collection, src);
        self.lookback_days.update_opt(file_config.lookback_days, src);
        self.cloud_ceiling.update_opt(file_config.cloud_ceiling, src);
        self.max_items_total.update_opt(file_config.max_items_total, src);
        self.per_tile.update_opt(file_config.per_tile, src);
        self.fetch_limit.update_opt(file_config.fetch_limit, src);
        self.resolution_m.update_opt(file_config.resolution_m, src);
        self.max_dim.update_opt(file_config.max_dim, src);
        self.composite_method.update_opt(file_config.composite_method, src);
        self.min_valid_fraction.update_opt(file_config.min_valid_fraction, src);
        self.selection_policy.update_opt(file_config.selection_policy, src);
        self.invalid_classes.update_opt(file_config.invalid_classes, src);
        self.cloud_buffer_px.update_opt(file_config.cloud_buffer_px, src);
        self.db_batch_size.update_opt(file_config.db_batch_size, src);
        self.output_dir.update_opt(file_config.output_dir, src);
        self.artifact_prefix.update_opt(file_config.artifact_prefix, src);
        self.thumbnail_dir.update_opt(file_config.thumbnail_dir, src);

        if let Some(bands) = file_config.bands {
            self.band_red.update_opt(bands.red, src);
            self.band_nir.update_opt(bands.nir, src);
            self.band_classification.update_opt(bands.classification, src);
        }

        Ok(self)
    }

    /// Load the file if it exists, otherwise keep the current layers
    pub fn load_from_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        if path.as_ref().exists() {
            self.load_from_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mut self) -> Self {
        let src = ConfigSource::Environment;

        if let Ok(path) = env::var("CANOPY_ROI_PATH") {
            self.roi_path.update(PathBuf::from(path), src);
        }
        if let Ok(url) = env::var("CANOPY_STAC_URL") {
            self.stac_url.update(url, src);
        }
        if let Ok(collection) = env::var("CANOPY_COLLECTION") {
            self.collection.update(collection, src);
        }

        self.lookback_days.update_opt(env_parsed("CANOPY_LOOKBACK_DAYS", "integer"), src);
        self.cloud_ceiling.update_opt(env_parsed("CANOPY_CLOUD_CEILING", "number"), src);
        self.max_items_total.update_opt(env_parsed("CANOPY_MAX_ITEMS_TOTAL", "integer"), src);
        self.per_tile.update_opt(env_parsed("CANOPY_PER_TILE", "integer"), src);
        self.fetch_limit.update_opt(env_parsed("CANOPY_FETCH_LIMIT", "integer"), src);
        self.resolution_m.update_opt(env_parsed("CANOPY_RESOLUTION_M", "number"), src);
        self.max_dim.update_opt(env_parsed("CANOPY_MAX_DIM", "integer"), src);
        self.min_valid_fraction
            .update_opt(env_parsed("CANOPY_MIN_VALID_FRACTION", "number"), src);
        self.cloud_buffer_px.update_opt(env_parsed("CANOPY_CLOUD_BUFFER_PX", "integer"), src);
        self.db_batch_size.update_opt(env_parsed("CANOPY_DB_BATCH_SIZE", "integer"), src);

        if let Ok(method) = env::var("CANOPY_COMPOSITE") {
            match CompositeMethod::parse(&method) {
                Ok(method) => self.composite_method.update(method, src),
                Err(_) => tracing::warn!(
                    "Invalid CANOPY_COMPOSITE value '{}': expected max or median",
                    method
                ),
            }
        }

        if let Ok(policy) = env::var("CANOPY_SELECTION_POLICY") {
            match SelectionPolicy::parse(&policy) {
                Ok(policy) => self.selection_policy.update(policy, src),
                Err(_) => tracing::warn!(
                    "Invalid CANOPY_SELECTION_POLICY value '{}': expected cloud-then-recency or recency-first",
                    policy
                ),
            }
        }

        if let Ok(classes) = env::var("CANOPY_INVALID_CLASSES") {
            match InvalidClasses::parse(&classes) {
                Ok(classes) => self.invalid_classes.update(classes, src),
                Err(e) => tracing::warn!("Invalid CANOPY_INVALID_CLASSES value '{}': {}", classes, e),
            }
        }

        if let Ok(dir) = env::var("CANOPY_OUTPUT_DIR") {
            self.output_dir.update(PathBuf::from(dir), src);
        }
        if let Ok(prefix) = env::var("CANOPY_ARTIFACT_PREFIX") {
            self.artifact_prefix.update(prefix, src);
        }
        if let Ok(dir) = env::var("CANOPY_THUMBNAIL_DIR") {
            self.thumbnail_dir.update(dir, src);
        }
        if let Ok(key) = env::var("CANOPY_BAND_RED") {
            self.band_red.update(key, src);
        }
        if let Ok(key) = env::var("CANOPY_BAND_NIR") {
            self.band_nir.update(key, src);
        }
        if let Ok(key) = env::var("CANOPY_BAND_SCL") {
            self.band_classification.update(key, src);
        }

        self
    }

    /// Update configuration from CLI arguments
    pub fn update_from_cli(&mut self, overrides: CliConfigOverrides) {
        let src = ConfigSource::Cli;
        self.roi_path.update_opt(overrides.roi_path, src);
        self.stac_url.update_opt(overrides.stac_url, src);
        self.collection.update_opt(overrides.collection, src);
        self.lookback_days.update_opt(overrides.lookback_days, src);
        self.cloud_ceiling.update_opt(overrides.cloud_ceiling, src);
        self.max_items_total.update_opt(overrides.max_items_total, src);
        self.per_tile.update_opt(overrides.per_tile, src);
        self.fetch_limit.update_opt(overrides.fetch_limit, src);
        self.resolution_m.update_opt(overrides.resolution_m, src);
        self.max_dim.update_opt(overrides.max_dim, src);
        self.composite_method.update_opt(overrides.composite_method, src);
        self.min_valid_fraction.update_opt(overrides.min_valid_fraction, src);
        self.selection_policy.update_opt(overrides.selection_policy, src);
        self.invalid_classes.update_opt(overrides.invalid_classes, src);
        self.cloud_buffer_px.update_opt(overrides.cloud_buffer_px, src);
        self.db_batch_size.update_opt(overrides.db_batch_size, src);
        self.output_dir.update_opt(overrides.output_dir, src);
    }

    /// Collapse the layers into validated settings
    pub fn resolve(&self) -> Result<PipelineSettings> {
        let settings = PipelineSettings {
            roi_path: self.roi_path.value.clone(),
            stac_url: self.stac_url.value.clone(),
            collection: self.collection.value.clone(),
            lookback_days: self.lookback_days.value,
            cloud_ceiling: self.cloud_ceiling.value,
            max_items_total: self.max_items_total.value,
            per_tile: self.per_tile.value,
            fetch_limit: self.fetch_limit.value,
            resolution_m: self.resolution_m.value,
            max_dim: self.max_dim.value,
            composite_method: self.composite_method.value,
            min_valid_fraction: self.min_valid_fraction.value,
            selection_policy: self.selection_policy.value,
            invalid_classes: self.invalid_classes.value,
            cloud_buffer_px: self.cloud_buffer_px.value,
            db_batch_size: self.db_batch_size.value,
            output_dir: self.output_dir.value.clone(),
            artifact_prefix: self.artifact_prefix.value.clone(),
            thumbnail_dir: self.thumbnail_dir.value.clone(),
            band_keys: BandKeys {
                red: self.band_red.value.clone(),
                nir: self.band_nir.value.clone(),
                classification: self.band_classification.value.clone(),
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Get all configuration values as a map for inspection
    pub fn to_inspection_map(&self) -> HashMap<String, (String, ConfigSource)> {
        fn entry<T: Display>(v: &ConfigValue<T>) -> (String, ConfigSource) {
            (v.value.to_string(), v.source)
        }
        fn path_entry(v: &ConfigValue<PathBuf>) -> (String, ConfigSource) {
            (v.value.display().to_string(), v.source)
        }

        let mut map = HashMap::new();
        map.insert("roi_path".to_string(), path_entry(&self.roi_path));
        map.insert("stac_url".to_string(), entry(&self.stac_url));
        map.insert("collection".to_string(), entry(&self.collection));
        map.insert("lookback_days".to_string(), entry(&self.lookback_days));
        map.insert("cloud_ceiling".to_string(), entry(&self.cloud_ceiling));
        map.insert("max_items_total".to_string(), entry(&self.max_items_total));
        map.insert("per_tile".to_string(), entry(&self.per_tile));
        map.insert("fetch_limit".to_string(), entry(&self.fetch_limit));
        map.insert("resolution_m".to_string(), entry(&self.resolution_m));
        map.insert("max_dim".to_string(), entry(&self.max_dim));
        map.insert("composite_method".to_string(), entry(&self.composite_method));
        map.insert("min_valid_fraction".to_string(), entry(&self.min_valid_fraction));
        map.insert("selection_policy".to_string(), entry(&self.selection_policy));
        map.insert("invalid_classes".to_string(), entry(&self.invalid_classes));
        map.insert("cloud_buffer_px".to_string(), entry(&self.cloud_buffer_px));
        map.insert("db_batch_size".to_string(), entry(&self.db_batch_size));
        map.insert("output_dir".to_string(), path_entry(&self.output_dir));
        map.insert("artifact_prefix".to_string(), entry(&self.artifact_prefix));
        map.insert("thumbnail_dir".to_string(), entry(&self.thumbnail_dir));
        map.insert("band_red".to_string(), entry(&self.band_red));
        map.insert("band_nir".to_string(), entry(&self.band_nir));
        map.insert("band_scl".to_string(), entry(&self.band_classification));
        map
    }
}

/// Read and parse an environment variable, warning on malformed values
fn env_parsed<T: FromStr>(key: &str, expected: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} value '{}': expected {}", key, raw, expected);
            None
        }
    }
}

/// Configuration loaded from TOML file
#[derive(Debug, Default, Deserialize, Serialize)]
struct FileConfig {
    roi_path: Option<PathBuf>,
    stac_url: Option<String>,
    collection: Option<String>,
    lookback_days: Option<u32>,
    cloud_ceiling: Option<f64>,
    max_items_total: Option<usize>,
    per_tile: Option<usize>,
    fetch_limit: Option<usize>,
    resolution_m: Option<f64>,
    max_dim: Option<usize>,
    composite_method: Option<CompositeMethod>,
    min_valid_fraction: Option<f64>,
    selection_policy: Option<SelectionPolicy>,
    invalid_classes: Option<InvalidClasses>,
    cloud_buffer_px: Option<usize>,
    db_batch_size: Option<usize>,
    output_dir: Option<PathBuf>,
    artifact_prefix: Option<String>,
    thumbnail_dir: Option<String>,
    bands: Option<FileBands>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct FileBands {
    red: Option<String>,
    nir: Option<String>,
    classification: Option<String>,
}

/// CLI configuration overrides
#[derive(Debug, Default)]
pub struct CliConfigOverrides {
    pub roi_path: Option<PathBuf>,
    pub stac_url: Option<String>,
    pub collection: Option<String>,
    pub lookback_days: Option<u32>,
    pub cloud_ceiling: Option<f64>,
    pub max_items_total: Option<usize>,
    pub per_tile: Option<usize>,
    pub fetch_limit: Option<usize>,
    pub resolution_m: Option<f64>,
    pub max_dim: Option<usize>,
    pub composite_method: Option<CompositeMethod>,
    pub min_valid_fraction: Option<f64>,
    pub selection_policy: Option<SelectionPolicy>,
    pub invalid_classes: Option<InvalidClasses>,
    pub cloud_buffer_px: Option<usize>,
    pub db_batch_size: Option<usize>,
    pub output_dir: Option<PathBuf>,
}
