//! Database management commands

use super::GlobalOptions;
use crate::cli::{DbArgs, DbCommand};
use crate::output::OutputWriter;
use crate::output_types::MigrationRow;
use crate::storage::connect_postgres;
use anyhow::{Context, Result};
use canopy_store::postgres::PostgresStore;

/// Execute database management commands
pub async fn execute(args: DbArgs, output: &OutputWriter, globals: &GlobalOptions) -> Result<()> {
    let store = connect_postgres(false).await?;

    match args.command {
        DbCommand::Migrate => execute_migrate(&store, output, globals.dry_run).await,
        DbCommand::Status => execute_status(&store, output).await,
    }
}

/// Apply pending migrations
async fn execute_migrate(store: &PostgresStore, output: &OutputWriter, dry_run: bool) -> Result<()> {
    let status = store.migration_status().await.context("Failed to read migration status")?;
    let pending: Vec<_> = status.iter().filter(|m| !m.applied).collect();

    if pending.is_empty() {
        output.success("Database schema is up to date");
        return Ok(());
    }

    if dry_run {
        output.info(format!("Dry run: Would apply {} migration(s)", pending.len()));
        for migration in &pending {
            output.info(format!("  - {} {}", migration.version, migration.description));
        }
        return Ok(());
    }

    output.info(format!("Applying {} migration(s)...", pending.len()));
    store.run_migrations().await.context("Failed to apply migrations")?;
    output.success(format!("Applied {} migration(s)", pending.len()));

    Ok(())
}

/// Show applied and pending migrations
async fn execute_status(store: &PostgresStore, output: &OutputWriter) -> Result<()> {
    store.health_check().await.context("Database health check failed")?;

    let rows: Vec<MigrationRow> = store
        .migration_status()
        .await
        .context("Failed to read migration status")?
        .into_iter()
        .map(|m| MigrationRow {
            version: m.version,
            description: m.description,
            applied: m.applied,
        })
        .collect();

    if !output.is_json() {
        output.section("Migrations");
    }
    output.table(&rows)?;

    if rows.iter().any(|r| !r.applied) && !output.is_json() {
        output.warning("Pending migrations; run 'canopy db migrate'");
    }

    Ok(())
}
