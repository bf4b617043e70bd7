use canopy_core::config::CliConfigOverrides;
use canopy_core::models::{BBoxAnchor, CompositeMethod, InvalidClasses, SelectionPolicy};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Canopy - Cloud-filtered NDVI composites and zonal statistics
#[derive(Parser, Debug)]
#[command(name = "canopy")]
#[command(about = "Cloud-filtered NDVI composites and zonal statistics", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Output results in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Show planned actions without executing them
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Storage backend to use (memory or postgres)
    #[arg(long, global = true, default_value = "memory")]
    pub storage: StorageBackend,

    /// Configuration file (defaults to ./canopy.toml when present)
    #[arg(long, global = true, value_name = "TOML")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StorageBackend {
    /// In-memory storage (default, for development)
    Memory,
    /// PostgreSQL/PostGIS persistent storage
    Postgres,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search, composite, publish, and compute zonal statistics
    Run(RunArgs),

    /// Search the catalog and show the scenes a run would use
    Scenes(ScenesArgs),

    /// Recompute zonal statistics for a published artifact
    Zonal(ZonalArgs),

    /// Show the effective configuration and where each value comes from
    Config,

    /// Manage the database schema
    Db(DbArgs),
}

/// Overrides for the run parameters
#[derive(Args, Debug, Default, Clone)]
pub struct RunParams {
    /// Region of interest (GeoJSON)
    #[arg(long, value_name = "PATH")]
    pub roi: Option<PathBuf>,

    /// STAC API root
    #[arg(long)]
    pub stac_url: Option<String>,

    /// STAC collection id
    #[arg(long)]
    pub collection: Option<String>,

    /// Search window length in days, ending now
    #[arg(long)]
    pub lookback_days: Option<u32>,

    /// Maximum scene cloud cover in percent
    #[arg(long)]
    pub cloud_ceiling: Option<f64>,

    /// Maximum number of scenes in the composite
    #[arg(long)]
    pub max_items: Option<usize>,

    /// Maximum number of scenes per tile
    #[arg(long)]
    pub per_tile: Option<usize>,

    /// Maximum number of items fetched from the catalog
    #[arg(long)]
    pub fetch_limit: Option<usize>,

    /// Target pixel size in meters
    #[arg(long)]
    pub resolution: Option<f64>,

    /// Maximum grid width or height in pixels
    #[arg(long)]
    pub max_dim: Option<usize>,

    /// Temporal reducer (max or median)
    #[arg(long, value_parser = CompositeMethod::parse)]
    pub composite: Option<CompositeMethod>,

    /// Minimum fraction of valid pixels for a scene to be kept
    #[arg(long)]
    pub min_valid_fraction: Option<f64>,

    /// Scene ordering (cloud-then-recency or recency-first)
    #[arg(long, value_parser = SelectionPolicy::parse)]
    pub selection_policy: Option<SelectionPolicy>,

    /// Scene classification codes masked out (comma list)
    #[arg(long, value_parser = InvalidClasses::parse)]
    pub invalid_classes: Option<InvalidClasses>,

    /// Dilation of the invalid-class mask in pixels
    #[arg(long)]
    pub cloud_buffer_px: Option<usize>,

    /// Zonal statistics rows per database batch
    #[arg(long)]
    pub db_batch_size: Option<usize>,

    /// Directory the artifacts are published to
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

impl RunParams {
    pub fn overrides(&self) -> CliConfigOverrides {
        CliConfigOverrides {
            roi_path: self.roi.clone(),
            stac_url: self.stac_url.clone(),
            collection: self.collection.clone(),
            lookback_days: self.lookback_days,
            cloud_ceiling: self.cloud_ceiling,
            max_items_total: self.max_items,
            per_tile: self.per_tile,
            fetch_limit: self.fetch_limit,
            resolution_m: self.resolution,
            max_dim: self.max_dim,
            composite_method: self.composite,
            min_valid_fraction: self.min_valid_fraction,
            selection_policy: self.selection_policy,
            invalid_classes: self.invalid_classes,
            cloud_buffer_px: self.cloud_buffer_px,
            db_batch_size: self.db_batch_size,
            output_dir: self.output_dir.clone(),
        }
    }
}

/// Restrict processing to part of the ROI envelope
#[derive(Args, Debug, Default, Clone)]
pub struct SubBoxArgs {
    /// Fraction of the ROI envelope width and height to keep, in (0, 1]
    #[arg(long, value_name = "FRACTION")]
    pub test_bbox_fraction: Option<f64>,

    /// Where the sub-box sits (center, sw, se, nw, ne)
    #[arg(long, value_parser = BBoxAnchor::parse, default_value = "center")]
    pub test_bbox_anchor: BBoxAnchor,
}

impl SubBoxArgs {
    pub fn selection(&self) -> Option<(f64, BBoxAnchor)> {
        self.test_bbox_fraction.map(|fraction| (fraction, self.test_bbox_anchor))
    }
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub params: RunParams,

    #[command(flatten)]
    pub sub_box: SubBoxArgs,

    /// Publish the composite without computing zonal statistics
    #[arg(long)]
    pub skip_zonal: bool,

    /// Parcel polygons (GeoJSON FeatureCollection) for the memory backend
    #[arg(long, value_name = "PATH")]
    pub polygons: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ScenesArgs {
    #[command(flatten)]
    pub params: RunParams,

    #[command(flatten)]
    pub sub_box: SubBoxArgs,
}

#[derive(Parser, Debug)]
pub struct ZonalArgs {
    /// Metadata sidecar of the artifact (defaults to the latest one)
    #[arg(long, value_name = "JSON")]
    pub metadata: Option<PathBuf>,

    /// Directory holding the published artifacts
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Rows per database batch
    #[arg(long)]
    pub db_batch_size: Option<usize>,

    /// Polygons between progress log lines
    #[arg(long)]
    pub progress_every: Option<usize>,

    /// Parcel polygons (GeoJSON FeatureCollection) for the memory backend
    #[arg(long, value_name = "PATH")]
    pub polygons: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct DbArgs {
    /// Database management command
    #[command(subcommand)]
    pub command: DbCommand,
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Apply pending schema migrations
    Migrate,

    /// Show which migrations have been applied
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::parse_from([
            "canopy",
            "run",
            "--composite",
            "median",
            "--max-items",
            "4",
            "--invalid-classes",
            "3,8,9",
            "--test-bbox-fraction",
            "0.25",
            "--test-bbox-anchor",
            "sw",
        ]);

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let overrides = args.params.overrides();
        assert_eq!(overrides.composite_method, Some(CompositeMethod::Median));
        assert_eq!(overrides.max_items_total, Some(4));
        assert_eq!(overrides.invalid_classes.map(|c| c.codes()), Some(vec![3, 8, 9]));
        assert!(overrides.roi_path.is_none());
        assert_eq!(args.sub_box.selection(), Some((0.25, BBoxAnchor::SouthWest)));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["canopy", "scenes", "--json", "--storage", "postgres"]);
        assert!(cli.json);
        assert_eq!(cli.storage, StorageBackend::Postgres);
        assert!(matches!(cli.command, Commands::Scenes(_)));
    }

    #[test]
    fn test_rejects_unknown_composite() {
        assert!(Cli::try_parse_from(["canopy", "run", "--composite", "mean"]).is_err());
    }
}
