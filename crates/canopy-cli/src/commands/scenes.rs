//! Scenes command implementation

use super::GlobalOptions;
use crate::backend::{raster_backend, scene_catalog};
use crate::cli::ScenesArgs;
use crate::config_loader::load_config_with_overrides;
use crate::output::OutputWriter;
use crate::output_types::{SceneRow, ScenesOutput};
use crate::progress::create_spinner;
use crate::storage::Storage;
use anyhow::{Context, Result};
use canopy_pipeline::{Pipeline, RunOptions};
use chrono::Utc;

pub async fn execute(args: ScenesArgs, output: &OutputWriter, globals: &GlobalOptions) -> Result<()> {
    let config = load_config_with_overrides(globals.config.as_deref(), args.params.overrides())?;
    let settings = config.resolve().context("Invalid configuration")?;

    // Planning reads no polygons and writes no rows
    let storage = Storage::new_memory(None)?;
    let pipeline = Pipeline::new(
        settings.clone(),
        scene_catalog(&settings)?,
        raster_backend()?,
        storage.polygons,
        storage.stats,
    );

    let options = RunOptions {
        now: Utc::now(),
        dry_run: true,
        skip_zonal: true,
        test_bbox: args.sub_box.selection(),
    };

    let spinner = (!output.is_json()).then(|| create_spinner("Searching catalog..."));
    let planned = pipeline.plan(&options).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let plan = match planned {
        Ok(plan) => plan,
        Err(e) if e.is_benign() => {
            if output.is_json() {
                output.result(serde_json::json!({ "candidates": 0, "selected": [] }))?;
            } else {
                output.warning(e);
            }
            return Ok(());
        }
        Err(e) => return Err(e).context("Scene search failed"),
    };

    let rows: Vec<SceneRow> = plan
        .selected
        .iter()
        .enumerate()
        .map(|(i, item)| SceneRow::new(i + 1, item))
        .collect();

    if output.is_json() {
        output.result(ScenesOutput {
            search_window: plan.window.interval(),
            candidates: plan.candidates,
            selected: rows,
            grid_size: [plan.grid.width, plan.grid.height],
            crs_epsg: plan.grid.epsg,
        })?;
    } else {
        output.section("Scene Search");
        output.kv("Collection", &settings.collection);
        output.kv("Search window", plan.window);
        output.kv("Candidates", plan.candidates);
        output.kv(
            "Grid",
            format!("{} x {} (EPSG:{})", plan.grid.width, plan.grid.height, plan.grid.epsg),
        );

        output.section(format!("Selected Scenes ({})", settings.selection_policy));
        output.table(&rows)?;
    }

    Ok(())
}
