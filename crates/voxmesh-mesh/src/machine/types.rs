use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::Connectivity;
use crate::protocol::IceCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    Idle,
    CreatingOffer,
    OfferSent,
    OfferReceived,
    Connected,
    Failed,
    Closed,
}

/// Why a peer's record was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// The peer left the channel.
    Left,
    /// Negotiation failed and the retry budget is spent.
    Unreachable,
    /// The local participant left the channel.
    LocalLeave,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::LocalLeave => write!(f, "local leave"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MachineInput {
    /// The peer was observed. `initiate` is set when this side offers.
    Start { initiate: bool },
    RemoteOffer(String),
    RemoteAnswer(String),
    RemoteCandidate(IceCandidate),
    // Outcomes of actions.
    OfferSent,
    AnswerSent,
    AnswerApplied,
    TracksAttached { renegotiate: bool },
    OperationFailed(String),
    // Engine and local events.
    Connectivity(Connectivity),
    Renegotiate,
    LocalTracksChanged,
    TimerFired(u64),
    TransportLost,
    Close,
}

impl MachineInput {
    /// Inputs that are handled immediately even while an engine operation
    /// for the peer is in flight. Everything else waits its turn.
    pub fn is_preemptive(&self) -> bool {
        matches!(
            self,
            Self::TimerFired(_)
                | Self::TransportLost
                | Self::Close
                | Self::Connectivity(
                    Connectivity::Disconnected | Connectivity::Failed | Connectivity::Closed
                )
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MachineAction {
    /// Create a fresh engine connection with the current local tracks,
    /// closing any previous one.
    Open,
    Rollback,
    /// Create an offer, set it locally and send it.
    SendOffer,
    /// Apply the remote offer, create an answer, set it locally and send it.
    SendAnswer(String),
    ApplyAnswer(String),
    /// Add remote candidates in order. Rejections are logged and ignored.
    AddCandidates(Vec<IceCandidate>),
    AttachLocalTracks,
    ArmTimer(u64),
    DisarmTimer,
    Teardown(RemovalReason),
}

impl MachineAction {
    /// Actions that run against the engine or transport.
    pub fn is_async(&self) -> bool {
        !matches!(
            self,
            Self::ArmTimer(_) | Self::DisarmTimer | Self::Teardown(_)
        )
    }
}
