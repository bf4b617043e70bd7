use crate::output::OutputWriter;
use canopy_core::config::PipelineSettings;
use canopy_pipeline::run::RunPlan;
use serde::Serialize;

/// Represents a planned action in dry-run mode
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    pub action_type: ActionType,
    pub description: String,
    pub details: Vec<String>,
}

/// Types of actions that can be planned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    FetchBands,
    Composite,
    WriteFile,
    StoreRows,
}

impl PlannedAction {
    /// Create a new planned action
    pub fn new(action_type: ActionType, description: impl Into<String>) -> Self {
        Self {
            action_type,
            description: description.into(),
            details: Vec::new(),
        }
    }

    /// Add a detail to the planned action
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }
}

/// Actions a run would take after planning
pub fn run_actions(plan: &RunPlan, settings: &PipelineSettings, skip_zonal: bool) -> Vec<PlannedAction> {
    let mut fetch = PlannedAction::new(
        ActionType::FetchBands,
        format!("Fetch and mask {} scene(s)", plan.selected.len()),
    )
    .with_detail(format!(
        "Bands: {}, {}, {}",
        settings.band_keys.red, settings.band_keys.nir, settings.band_keys.classification
    ));
    for item in &plan.selected {
        fetch = fetch.with_detail(format!(
            "{} (tile {}, {}, cloud {:.1}%)",
            item.id,
            item.tile_id,
            item.date_label(),
            item.cloud_cover
        ));
    }

    let mut actions = vec![
        fetch,
        PlannedAction::new(
            ActionType::Composite,
            format!("Composite with {}", settings.composite_method),
        )
        .with_detail(format!(
            "Grid: {} x {} pixels in EPSG:{}",
            plan.grid.width, plan.grid.height, plan.grid.epsg
        ))
        .with_detail(format!("Minimum valid fraction: {}", settings.min_valid_fraction)),
        PlannedAction::new(
            ActionType::WriteFile,
            format!("Publish artifacts to {}", settings.output_dir.display()),
        )
        .with_detail(format!("Versioned {}_YYYYMMDD bundle (native/web GeoTIFF, PNG, JSON)", settings.artifact_prefix))
        .with_detail(format!("Promote {}_latest aliases", settings.artifact_prefix)),
    ];

    if !skip_zonal {
        actions.push(
            PlannedAction::new(ActionType::StoreRows, "Compute zonal statistics")
                .with_detail(format!("Batches of {} rows in one transaction", settings.db_batch_size)),
        );
    }

    actions
}

/// Display planned actions in dry-run mode
pub fn display_planned_actions(output: &OutputWriter, actions: &[PlannedAction]) -> anyhow::Result<()> {
    if output.is_json() {
        output.result(serde_json::json!({
            "dry_run": true,
            "planned_actions": actions,
        }))?;
    } else {
        output.section("Planned Actions (Dry Run)");
        for (i, action) in actions.iter().enumerate() {
            output.info(format!("{}. {:?}: {}", i + 1, action.action_type, action.description));
            for detail in &action.details {
                output.info(format!("   - {}", detail));
            }
        }
        output.info("No pixels were read and nothing was written. Run without --dry-run to execute.");
    }
    Ok(())
}
