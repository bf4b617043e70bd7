//! Zonal command implementation

use super::GlobalOptions;
use crate::backend::raster_backend;
use crate::cli::ZonalArgs;
use crate::config_loader::load_config_with_overrides;
use crate::dry_run::{display_planned_actions, ActionType, PlannedAction};
use crate::output::OutputWriter;
use crate::output_types::ZonalOutput;
use crate::progress::PhaseProgress;
use crate::storage::Storage;
use anyhow::{Context, Result};
use canopy_core::config::CliConfigOverrides;
use canopy_core::models::ArtifactFiles;
use canopy_pipeline::publish::{read_metadata, LATEST_TAG};
use canopy_pipeline::{ZonalEngine, ZonalTarget};
use std::path::{Path, PathBuf};

pub async fn execute(args: ZonalArgs, output: &OutputWriter, globals: &GlobalOptions) -> Result<()> {
    let overrides = CliConfigOverrides {
        output_dir: args.output_dir.clone(),
        db_batch_size: args.db_batch_size,
        ..Default::default()
    };
    let config = load_config_with_overrides(globals.config.as_deref(), overrides)?;
    let settings = config.resolve().context("Invalid configuration")?;

    let metadata_path = args.metadata.clone().unwrap_or_else(|| {
        settings
            .output_dir
            .join(ArtifactFiles::named(&settings.artifact_prefix, LATEST_TAG).metadata)
    });
    let metadata = read_metadata(&metadata_path)
        .with_context(|| format!("Failed to read artifact metadata {}", metadata_path.display()))?;

    // The sidecar names its bundle relative to the directory it sits in
    let artifact_dir = metadata_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let raster_path = artifact_dir.join(&metadata.files.native_tif);

    if globals.dry_run {
        let actions = vec![
            PlannedAction::new(ActionType::StoreRows, "Register artifact")
                .with_detail(format!("Raster: {}", raster_path.display()))
                .with_detail(format!("Observation date: {}", metadata.observation_date)),
            PlannedAction::new(ActionType::StoreRows, "Compute zonal statistics")
                .with_detail(format!("Batches of {} rows in one transaction", settings.db_batch_size))
                .with_detail("Existing rows for this artifact are overwritten"),
        ];
        return display_planned_actions(output, &actions);
    }

    let io = raster_backend()?;
    let native_grid = *io
        .open(&raster_path)
        .with_context(|| format!("Failed to open {}", raster_path.display()))?
        .grid();

    let storage = Storage::new(globals.storage, args.polygons.as_deref()).await?;
    let target =
        ZonalTarget::register(storage.stats.as_ref(), &metadata, &native_grid, &artifact_dir)
            .await
            .context("Failed to register artifact")?;

    let mut engine = ZonalEngine::new(io, storage.polygons, storage.stats)
        .with_batch_size(settings.db_batch_size)
        .with_thumbnail_dir(settings.thumbnail_dir.clone());
    if let Some(every) = args.progress_every {
        engine = engine.with_progress_every(every);
    }

    let mut progress = PhaseProgress::new(output.is_json());
    let report = engine.run_with_progress(&target, |p| progress.update(&p)).await;
    match &report {
        Ok(_) => progress.finish(),
        Err(_) => progress.abandon(),
    }
    let report = report.context("Zonal statistics failed; no rows were committed")?;

    if output.is_json() {
        output.result(ZonalOutput::from(&report))?;
    } else {
        output.success(format!("Zonal statistics stored for artifact {}", report.artifact_id));
        output.kv("Raster", raster_path.display());
        output.kv("Processed", report.counters.processed);
        output.kv("Inserted", report.counters.inserted);
        output.kv("Out of bounds", report.counters.out_of_bounds);
        output.kv("No valid pixels", report.counters.no_valid_pixels);
        output.kv("Errors", report.counters.errors);
    }

    Ok(())
}
