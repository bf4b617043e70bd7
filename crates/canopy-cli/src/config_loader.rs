//! Configuration loading utilities for CLI commands

use anyhow::{Context, Result};
use canopy_core::config::{CliConfigOverrides, LayeredConfig};
use std::path::Path;

/// Configuration file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "canopy.toml";

/// Load layered configuration: defaults, then the file, then the environment.
///
/// An explicit `path` must exist; the default file is optional.
pub fn load_config(path: Option<&Path>) -> Result<LayeredConfig> {
    let config = LayeredConfig::with_defaults();

    let config = match path {
        Some(path) => config
            .load_from_file(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?,
        None => config
            .load_from_optional_file(DEFAULT_CONFIG_FILE)
            .context("Failed to load configuration file")?,
    };

    Ok(config.load_from_env())
}

/// Load layered configuration with CLI overrides on top
pub fn load_config_with_overrides(
    path: Option<&Path>,
    overrides: CliConfigOverrides,
) -> Result<LayeredConfig> {
    let mut config = load_config(path)?;
    config.update_from_cli(overrides);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::config::ConfigSource;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("canopy.toml");
        std::fs::write(&path, "max_dim = 4000\noutput_dir = \"from-file\"\n").unwrap();

        let overrides = CliConfigOverrides {
            output_dir: Some(PathBuf::from("from-cli")),
            ..Default::default()
        };
        let config = load_config_with_overrides(Some(&path), overrides).unwrap();

        assert_eq!(config.max_dim.value, 4000);
        assert_eq!(config.max_dim.source, ConfigSource::File);
        assert_eq!(config.output_dir.value, PathBuf::from("from-cli"));
        assert_eq!(config.output_dir.source, ConfigSource::Cli);
    }
}
