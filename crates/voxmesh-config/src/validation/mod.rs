//! Full configuration validation.
//!
//! Each domain has its own submodule; `validate` calls them all and
//! collects errors into a single `ConfigError`.

mod helpers;
mod network;


use crate::schema::VoxmeshConfig;
use helpers::validate_range;
use voxmesh_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &VoxmeshConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    network::validate_signaling(&mut errors, config);
    network::validate_ice_servers(&mut errors, config);
    network::validate_relay(&mut errors, config);
    validate_negotiation(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_negotiation(errors: &mut Vec<String>, config: &VoxmeshConfig) {
    validate_range(
        errors,
        "negotiation.timeout_secs",
        config.negotiation.timeout_secs,
        1,
        120,
    );
    validate_range(
        errors,
        "negotiation.retry_limit",
        config.negotiation.retry_limit as u64,
        0,
        3,
    );
}
