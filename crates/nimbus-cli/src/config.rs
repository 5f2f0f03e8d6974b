//! CLI configuration loading.
//!
//! Sources, lowest priority first: the config file (`--config`, or
//! `config.toml` in the platform config directory), then `NIMBUS_*`
//! environment variables. Nested keys use `__`, e.g. `NIMBUS_LOCK__ATTEMPTS`.

use ::config::{Config, Environment, File};
use nimbus_core::DistributorSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub distributor: DistributorSettings,
    /// Write objects under this directory instead of S3.
    pub filesystem_root: Option<PathBuf>,
}

impl CliConfig {
    /// Load configuration from `path` (or the default location) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        Self::from_sources(path, environment())
    }

    fn from_sources(
        path: Option<&Path>,
        env: Environment,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Self::config_path()?).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Default configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = directories::ProjectDirs::from("dev", "nimbus", "nimbus")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

fn environment() -> Environment {
    Environment::with_prefix("NIMBUS")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
