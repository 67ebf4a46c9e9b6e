//! Local capture defaults used when joining a channel.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Capture audio on join. Joining without audio is allowed but unusual.
    pub audio: bool,
    /// Capture video on join.
    pub video: bool,
    /// Join with the microphone muted.
    pub start_muted: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
            start_muted: false,
        }
    }
}
