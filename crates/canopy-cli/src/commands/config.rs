//! Config command implementation

use super::GlobalOptions;
use crate::config_loader::load_config;
use crate::output::OutputWriter;
use crate::output_types::ConfigRow;
use anyhow::Result;
use std::collections::BTreeMap;

pub fn execute(output: &OutputWriter, globals: &GlobalOptions) -> Result<()> {
    let config = load_config(globals.config.as_deref())?;

    let rows: Vec<ConfigRow> = config
        .to_inspection_map()
        .into_iter()
        .collect::<BTreeMap<_, _>>()
        .into_iter()
        .map(|(key, (value, source))| ConfigRow {
            key,
            value,
            source: format!("{:?}", source),
        })
        .collect();

    if !output.is_json() {
        output.section("Effective Configuration");
    }
    output.table(&rows)?;

    // invalid values are reported, not fatal
    if let Err(e) = config.resolve() {
        output.warning(format!("Configuration would be rejected by a run: {}", e));
    }

    Ok(())
}
