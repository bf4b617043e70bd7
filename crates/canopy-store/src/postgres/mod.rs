//! PostgreSQL/PostGIS storage adapter

pub mod config;
pub mod migrations;
pub mod polygons;
pub mod transaction;
pub mod zonal;

pub use config::{ConfigError, MigrationConfig, PolygonSource, PoolConfig, PostgresConfig};
pub use migrations::{MigrationError, MigrationManager, MigrationStatus};
pub use transaction::TimedTransaction;
pub use zonal::PgZonalTx;

use canopy_core::error::{CanopyError, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

/// PostgreSQL storage adapter
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    config: PostgresConfig,
}

impl PostgresStore {
    /// Connect with the given configuration and check the connection
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        config.validate().map_err(|e| CanopyError::ConfigInvalid {
            key: "database_url".to_string(),
            reason: e.to_string(),
        })?;

        let pool = PgPoolOptions::new()
            .min_connections(config.pool.min_connections)
            .max_connections(config.pool.max_connections)
            .acquire_timeout(config.pool.acquire_timeout)
            .idle_timeout(config.pool.idle_timeout)
            .max_lifetime(config.pool.max_lifetime)
            .connect(&config.database_url)
            .await
            .map_err(|e| CanopyError::Store(format!("Failed to connect to database: {}", e)))?;

        let store = Self { pool, config };
        store.health_check().await?;

        if store.config.migrations.auto_run {
            store.run_migrations().await?;
        }
        Ok(store)
    }

    /// Connect and apply pending migrations
    pub async fn with_migrations(config: PostgresConfig) -> Result<Self> {
        let store = Self::new(config).await?;
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        MigrationManager::new(self.pool.clone())
            .run_migrations()
            .await
            .map_err(|e| CanopyError::Store(format!("Migration failed: {}", e)))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    pub async fn migration_status(&self) -> Result<Vec<MigrationStatus>> {
        MigrationManager::new(self.pool.clone())
            .check_status()
            .await
            .map_err(|e| CanopyError::Store(format!("Failed to check migration status: {}", e)))
    }

    pub async fn has_pending_migrations(&self) -> Result<bool> {
        MigrationManager::new(self.pool.clone())
            .has_pending_migrations()
            .await
            .map_err(|e| CanopyError::Store(format!("Failed to check pending migrations: {}", e)))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| CanopyError::Store(format!("Health check failed: {}", e)))?;
        Ok(())
    }
}
