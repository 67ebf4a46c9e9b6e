//! Core TOML config loading: read from path or platform default.

use crate::schema::VoxmeshConfig;
use crate::validation;
use std::path::Path;
use tracing::{info, warn};
use voxmesh_common::ConfigError;

use super::paths::{create_default_config, default_config_path};

/// Load config from a specific TOML file path.
///
/// Missing fields take their serde defaults. A config that fails validation
/// is still returned, with a warning logged.
pub fn load_from_path(path: &Path) -> Result<VoxmeshConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError(format!("failed to read {}: {e}", path.display())))?;

    let config: VoxmeshConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    if let Err(e) = validation::validate(&config) {
        warn!("config validation warning: {e}; using parsed values as-is");
    }

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Load config from the platform-specific default path.
///
/// On Linux: `~/.config/voxmesh/config.toml`
///
/// If the file does not exist, writes a default config file and returns defaults.
pub fn load_default() -> Result<VoxmeshConfig, ConfigError> {
    let path = default_config_path()?;

    match load_from_path(&path) {
        Ok(config) => Ok(config),
        Err(ConfigError::ParseError(msg)) if msg.contains("failed to read") => {
            info!("no config found at {}, creating default", path.display());
            create_default_config(&path)?;
            Ok(VoxmeshConfig::default())
        }
        Err(e) => Err(e),
    }
}
