//! Command implementations

mod config;
mod db;
mod run;
mod scenes;
mod zonal;

use crate::cli::{Cli, Commands, StorageBackend};
use crate::output::OutputWriter;
use anyhow::Result;
use std::path::PathBuf;

/// Flags shared by every command
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub dry_run: bool,
    pub storage: StorageBackend,
    pub config: Option<PathBuf>,
}

/// Execute a CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let output = OutputWriter::new(cli.json);
    let globals = GlobalOptions {
        dry_run: cli.dry_run,
        storage: cli.storage,
        config: cli.config,
    };

    match cli.command {
        Commands::Run(args) => run::execute(args, &output, &globals).await,
        Commands::Scenes(args) => scenes::execute(args, &output, &globals).await,
        Commands::Zonal(args) => zonal::execute(args, &output, &globals).await,
        Commands::Config => config::execute(&output, &globals),
        Commands::Db(args) => db::execute(args, &output, &globals).await,
    }
}
