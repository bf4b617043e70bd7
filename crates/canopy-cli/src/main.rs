//! Canopy CLI - Command-line interface
//!
//! Runs the compositing pipeline, reprocesses zonal statistics and manages
//! the PostgreSQL schema.

mod backend;
mod cli;
mod commands;
mod config_loader;
mod dry_run;
mod output;
mod output_types;
mod progress;
mod storage;

use anyhow::Result;
use clap::Parser;
use cli::Cli;

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // The pipeline is driven on this thread; projection handles are not Send
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(commands::execute(cli))?;

    Ok(())
}
