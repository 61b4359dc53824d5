//! Configuration management for the rate guard engine.
//!
//! Builds the immutable [`Config`] tree once at startup: crate defaults
//! first, then an optional configuration file, then environment
//! variables (double-underscore separated, e.g. `SERVER__PORT`). The
//! result is shared by reference and never mutated at runtime.

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use std::env;

use crate::models::Config;

/// Load configuration from defaults, file, and environment.
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let defaults = ConfigBuilder::try_from(&Config::default())?;
    let config = ConfigBuilder::builder()
        .add_source(defaults)
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    config.try_deserialize()
}
