//! voxmesh configuration.
//!
//! TOML-based configuration shared by the mesh client and the relay. Every
//! section has defaults, so partial configs work out of the box.
//!
//! ```rust,no_run
//! use voxmesh_config::{load_config, config_to_json};
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    IceServerConfig, LogLevel, LoggingConfig, MediaConfig, NegotiationConfig, RelayConfig,
    RtcConfig, SignalingConfig, VoxmeshConfig, CONFIG_SCHEMA_VERSION,
};

use voxmesh_common::ConfigError;

/// Load and validate `config.toml` from the OS config directory, creating a
/// default file if none exists.
pub fn load_config() -> Result<VoxmeshConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &VoxmeshConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
