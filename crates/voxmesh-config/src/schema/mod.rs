//! Configuration schema types for voxmesh.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod media;
mod negotiation;
mod relay;
mod rtc;
mod signaling;
mod system;

pub use media::*;
pub use negotiation::*;
pub use relay::*;
pub use rtc::*;
pub use signaling::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration shared by the mesh client and the relay.
///
/// Only override what you want to change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct VoxmeshConfig {
    pub signaling: SignalingConfig,
    pub rtc: RtcConfig,
    pub negotiation: NegotiationConfig,
    pub media: MediaConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}
