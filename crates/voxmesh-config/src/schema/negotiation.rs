//! Offer/answer negotiation limits.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Seconds a negotiation may take before it counts as failed (valid range: 1-120).
    pub timeout_secs: u64,
    /// Renegotiation attempts after a failure before the peer is dropped (valid range: 0-3).
    pub retry_limit: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            retry_limit: 1,
        }
    }
}
