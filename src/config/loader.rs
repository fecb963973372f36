// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{RawRefreshConfig, RefreshConfig};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw config.
///
/// This only performs TOML deserialization; it does **not** validate. Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawRefreshConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawRefreshConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// This is the recommended entry point for embedding applications.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<RefreshConfig> {
    let raw = load_from_path(path)?;
    RefreshConfig::try_from(raw)
}

/// Parse and validate configuration held in memory.
pub fn parse_and_validate(contents: &str) -> Result<RefreshConfig> {
    let raw: RawRefreshConfig = toml::from_str(contents)?;
    RefreshConfig::try_from(raw)
}
