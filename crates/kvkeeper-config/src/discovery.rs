//! Config file loading.
//!
//! The file format is picked from the extension: `.toml` is parsed as
//! TOML, everything else as YAML. A missing file is not an error; the
//! defaults are used instead.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::{ConfigError, KeeperConfig, Result};

/// Default config file path, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "./config.yaml";

/// Result of loading a config file.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The normalized configuration.
    pub config: KeeperConfig,
    /// Path that was checked.
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist.
pub fn load_config(path: &Path) -> Result<LoadedConfig> {
    let config = match std::fs::read_to_string(path) {
        Ok(contents) => {
            info!(path = %path.display(), "Loading config file");
            parse_config(path, &contents)?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(LoadedConfig {
                config: KeeperConfig::default(),
                path: path.to_path_buf(),
                loaded: false,
            });
        }
        Err(e) => {
            return Err(ConfigError::ReadFile {
                path: path.display().to_string(),
                source: e,
            });
        }
    };

    config.validate()?;

    Ok(LoadedConfig {
        config,
        path: path.to_path_buf(),
        loaded: true,
    })
}

/// Load config from a specific file path; the file must exist.
pub fn load_config_file(path: &Path) -> Result<KeeperConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let config = parse_config(path, &contents)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(path: &Path, contents: &str) -> Result<KeeperConfig> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => KeeperConfig::from_toml(contents),
        _ => KeeperConfig::from_yaml(contents),
    }
}
