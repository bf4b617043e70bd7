//! Run command implementation

use super::GlobalOptions;
use crate::backend::{raster_backend, scene_catalog};
use crate::cli::RunArgs;
use crate::config_loader::load_config_with_overrides;
use crate::dry_run::{display_planned_actions, run_actions};
use crate::output::OutputWriter;
use crate::output_types::RunOutput;
use crate::progress::PhaseProgress;
use crate::storage::Storage;
use anyhow::{Context, Result};
use canopy_pipeline::{Pipeline, RunOptions, RunOutcome, RunReport};
use chrono::Utc;

pub async fn execute(args: RunArgs, output: &OutputWriter, globals: &GlobalOptions) -> Result<()> {
    let config = load_config_with_overrides(globals.config.as_deref(), args.params.overrides())?;
    let settings = config.resolve().context("Invalid configuration")?;

    // A dry run never touches the database
    let storage = if globals.dry_run {
        Storage::new_memory(None)?
    } else {
        Storage::new(globals.storage, args.polygons.as_deref()).await?
    };

    let catalog = scene_catalog(&settings)?;
    let io = raster_backend()?;
    let pipeline = Pipeline::new(settings, catalog, io, storage.polygons, storage.stats);

    let options = RunOptions {
        now: Utc::now(),
        dry_run: globals.dry_run,
        skip_zonal: args.skip_zonal,
        test_bbox: args.sub_box.selection(),
    };

    let mut progress = PhaseProgress::new(output.is_json());
    let outcome = pipeline.run_with_progress(&options, |p| progress.update(&p)).await;
    match &outcome {
        Ok(_) => progress.finish(),
        Err(_) => progress.abandon(),
    }

    match outcome.context("Pipeline run failed")? {
        RunOutcome::NoScenes => {
            if output.is_json() {
                output.result(serde_json::json!({ "published": false, "reason": "no_scenes" }))?;
            } else {
                output.warning("No scenes matched the search window and cloud ceiling; nothing published");
            }
        }
        RunOutcome::Planned(plan) => {
            if !output.is_json() {
                output.section("Plan");
                output.kv("Search window", plan.window);
                output.kv("Candidates", plan.candidates);
                output.kv("Selected", plan.selected.len());
            }
            let actions = run_actions(&plan, pipeline.settings(), args.skip_zonal);
            display_planned_actions(output, &actions)?;
        }
        RunOutcome::Published(report) => display_report(&report, output)?,
    }

    Ok(())
}

fn display_report(report: &RunReport, output: &OutputWriter) -> Result<()> {
    let summary = RunOutput::from(report);

    if output.is_json() {
        return output.result(summary);
    }

    output.success(format!("Published composite {}", summary.tag));

    output.section("Composite");
    output.kv("Observation date", &summary.observation_date);
    output.kv("Date range", &summary.date_range);
    output.kv("Scenes used", summary.items_used.join(", "));
    output.kv(
        "Grid",
        format!("{} x {} (EPSG:{})", summary.grid_size[0], summary.grid_size[1], summary.crs_epsg),
    );
    output.kv("NDVI", &summary.summary);
    for skipped in &summary.skipped {
        output.warning(format!("Skipped {}: {}", skipped.item_id, skipped.reason));
    }

    output.section("Artifacts");
    for file in &summary.files {
        output.info(file);
    }
    if !summary.latest_promoted {
        output.warning("Latest aliases were not fully updated");
    }
    for warning in &summary.warnings {
        output.warning(warning);
    }

    output.section("Zonal Statistics");
    match &summary.zonal {
        Some(zonal) => {
            output.kv("Artifact", zonal.artifact_id);
            output.kv("Counters", zonal.counters);
        }
        None => output.kv("Status", "Skipped"),
    }

    Ok(())
}
