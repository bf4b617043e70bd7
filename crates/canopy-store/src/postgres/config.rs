//! PostgreSQL configuration

use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// PostgreSQL connection and behavior configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub database_url: String,
    /// Connection pool configuration
    pub pool: PoolConfig,
    /// Migration configuration
    pub migrations: MigrationConfig,
    /// Where land-parcel polygons are read from
    pub polygons: PolygonSource,
    /// Limit on commit and rollback of a zonal write transaction
    pub transaction_timeout: Duration,
}

impl PostgresConfig {
    /// Load configuration from environment variables
    ///
    /// Requires DATABASE_URL. The polygon source honours
    /// `CANOPY_POLYGON_TABLE`, `CANOPY_POLYGON_ID_COLUMN` and
    /// `CANOPY_POLYGON_GEOM_COLUMN`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::Missing("DATABASE_URL".to_string()))?;

        let mut config = Self::new(database_url)?;
        config.polygons = PolygonSource::from_env();
        config.validate()?;
        Ok(config)
    }

    /// Create a new configuration with the given database URL
    pub fn new(database_url: String) -> Result<Self, ConfigError> {
        if database_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "database_url".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        Ok(Self {
            database_url,
            pool: PoolConfig::default(),
            migrations: MigrationConfig::default(),
            polygons: PolygonSource::default(),
            transaction_timeout: Duration::from_secs(30),
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "database_url".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        self.pool.validate()?;
        self.polygons.validate()?;

        Ok(())
    }
}

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Maximum number of connections allowed
    pub max_connections: u32,
    /// Timeout for acquiring a connection from the pool
    pub acquire_timeout: Duration,
    /// Timeout for idle connections before they are closed
    pub idle_timeout: Duration,
    /// Maximum lifetime of a connection
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "pool.max_connections".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::Invalid {
                key: "pool.min_connections".to_string(),
                reason: format!(
                    "min_connections ({}) cannot be greater than max_connections ({})",
                    self.min_connections, self.max_connections
                ),
            });
        }

        Ok(())
    }
}

/// Migration configuration
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Whether to automatically run migrations on startup
    pub auto_run: bool,
    /// Name of the migration tracking table
    pub migration_table: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            auto_run: false,
            migration_table: "_sqlx_migrations".to_string(),
        }
    }
}

/// Table and columns holding the land-parcel polygons
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolygonSource {
    pub table: String,
    pub id_column: String,
    pub geometry_column: String,
}

impl Default for PolygonSource {
    fn default() -> Self {
        Self {
            table: "parcels".to_string(),
            id_column: "id".to_string(),
            geometry_column: "geom".to_string(),
        }
    }
}

impl PolygonSource {
    pub fn from_env() -> Self {
        let d = Self::default();
        let var = |key: &str, default: String| {
            std::env::var(key).ok().filter(|v| !v.trim().is_empty()).unwrap_or(default)
        };
        Self {
            table: var("CANOPY_POLYGON_TABLE", d.table),
            id_column: var("CANOPY_POLYGON_ID_COLUMN", d.id_column),
            geometry_column: var("CANOPY_POLYGON_GEOM_COLUMN", d.geometry_column),
        }
    }

    /// Names are spliced into SQL, so only plain (optionally schema-qualified)
    /// identifiers are accepted
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("polygons.table", &self.table, true),
            ("polygons.id_column", &self.id_column, false),
            ("polygons.geometry_column", &self.geometry_column, false),
        ];
        for (key, name, qualified) in checks {
            if !is_identifier(name, qualified) {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: format!("'{}' is not a plain SQL identifier", name),
                });
            }
        }
        Ok(())
    }

    /// `SELECT` producing `(id, geojson, srid)` rows
    pub fn list_query(&self) -> String {
        format!(
            "SELECT {id}::BIGINT AS id, ST_AsGeoJSON({geom}) AS geojson, ST_SRID({geom}) AS srid \
             FROM {table} WHERE {geom} IS NOT NULL ORDER BY {id}",
            id = self.id_column,
            geom = self.geometry_column,
            table = self.table,
        )
    }
}

fn is_identifier(name: &str, allow_schema: bool) -> bool {
    let part_ok = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    let parts: Vec<&str> = name.split('.').collect();
    match parts.len() {
        1 => part_ok(parts[0]),
        2 if allow_schema => parts.iter().all(|p| part_ok(p)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_new_valid() {
        let config = PostgresConfig::new("postgresql://localhost/test".to_string());
        assert!(config.is_ok());
    }

    #[test]
    fn test_config_new_empty_url() {
        match PostgresConfig::new("  ".to_string()) {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "database_url"),
            other => panic!("Expected Invalid error, got {:?}", other),
        }
    }

    #[test]
    fn test_pool_config_default() {
        let pool = PoolConfig::default();
        assert_eq!(pool.min_connections, 2);
        assert_eq!(pool.max_connections, 10);
        assert!(pool.validate().is_ok());
    }

    #[test]
    fn test_pool_config_invalid() {
        let mut pool = PoolConfig { min_connections: 20, ..PoolConfig::default() };
        assert!(pool.validate().is_err());
        pool.max_connections = 0;
        assert!(pool.validate().is_err());
    }

    #[test]
    fn test_polygon_source_rejects_injection() {
        let mut source = PolygonSource::default();
        assert!(source.validate().is_ok());

        source.table = "gis.parcels".to_string();
        assert!(source.validate().is_ok());

        source.table = "parcels; DROP TABLE x".to_string();
        assert!(source.validate().is_err());

        source = PolygonSource { id_column: "a.b".to_string(), ..PolygonSource::default() };
        assert!(source.validate().is_err());
    }

    #[test]
    fn test_list_query() {
        let query = PolygonSource::default().list_query();
        assert_eq!(
            query,
            "SELECT id::BIGINT AS id, ST_AsGeoJSON(geom) AS geojson, ST_SRID(geom) AS srid \
             FROM parcels WHERE geom IS NOT NULL ORDER BY id"
        );
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("DATABASE_URL", "postgresql://localhost/canopy");
        std::env::set_var("CANOPY_POLYGON_TABLE", "recintos");
        std::env::set_var("CANOPY_POLYGON_GEOM_COLUMN", "the_geom");

        let config = PostgresConfig::from_env().unwrap();
        assert_eq!(config.polygons.table, "recintos");
        assert_eq!(config.polygons.id_column, "id");
        assert_eq!(config.polygons.geometry_column, "the_geom");

        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("CANOPY_POLYGON_TABLE");
        std::env::remove_var("CANOPY_POLYGON_GEOM_COLUMN");
        assert!(matches!(PostgresConfig::from_env(), Err(ConfigError::Missing(_))));
    }
}
