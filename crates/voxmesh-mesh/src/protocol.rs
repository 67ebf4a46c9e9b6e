//! Wire protocol between mesh clients and the signaling relay.
//!
//! Every frame is a JSON text message tagged by `type`. Relayed kinds carry
//! `to` and `from`; the relay overwrites `from` with the sender's bound id.

use serde::{Deserialize, Serialize};
use voxmesh_common::{ChannelId, PeerId, SignalingError};

/// A trickled ICE candidate as exchanged on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Client asks the relay to join a channel.
    Join {
        channel_id: ChannelId,
        peer_id: PeerId,
    },
    /// Client leaves its channel.
    Leave {
        channel_id: ChannelId,
        peer_id: PeerId,
    },
    /// Relay reply to `join`: everyone already in the channel.
    Roster {
        channel_id: ChannelId,
        peers: Vec<PeerId>,
    },
    PeerJoined {
        channel_id: ChannelId,
        peer_id: PeerId,
    },
    PeerLeft {
        channel_id: ChannelId,
        peer_id: PeerId,
    },
    Offer {
        channel_id: ChannelId,
        to: PeerId,
        from: PeerId,
        sdp: String,
    },
    Answer {
        channel_id: ChannelId,
        to: PeerId,
        from: PeerId,
        sdp: String,
    },
    IceCandidate {
        channel_id: ChannelId,
        to: PeerId,
        from: PeerId,
        candidate: IceCandidate,
    },
    /// Mute/video flags of `from`. Broadcast to the channel when `to` is absent.
    MediaState {
        channel_id: ChannelId,
        from: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<PeerId>,
        muted: bool,
        video_enabled: bool,
    },
    Error {
        message: String,
    },
}

impl SignalMessage {
    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|e| SignalingError::Protocol(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(|e| SignalingError::Encode(e.to_string()))
    }

    /// Wire name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Roster { .. } => "roster",
            Self::PeerJoined { .. } => "peer-joined",
            Self::PeerLeft { .. } => "peer-left",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::MediaState { .. } => "media-state",
            Self::Error { .. } => "error",
        }
    }

    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            Self::Join { channel_id, .. }
            | Self::Leave { channel_id, .. }
            | Self::Roster { channel_id, .. }
            | Self::PeerJoined { channel_id, .. }
            | Self::PeerLeft { channel_id, .. }
            | Self::Offer { channel_id, .. }
            | Self::Answer { channel_id, .. }
            | Self::IceCandidate { channel_id, .. }
            | Self::MediaState { channel_id, .. } => Some(channel_id),
            Self::Error { .. } => None,
        }
    }

    /// Originating peer of a peer-to-peer kind.
    pub fn sender(&self) -> Option<&PeerId> {
        match self {
            Self::Offer { from, .. }
            | Self::Answer { from, .. }
            | Self::IceCandidate { from, .. }
            | Self::MediaState { from, .. } => Some(from),
            _ => None,
        }
    }

    /// Addressed peer of a peer-to-peer kind. `None` for broadcasts.
    pub fn recipient(&self) -> Option<&PeerId> {
        match self {
            Self::Offer { to, .. } | Self::Answer { to, .. } | Self::IceCandidate { to, .. } => {
                Some(to)
            }
            Self::MediaState { to, .. } => to.as_ref(),
            _ => None,
        }
    }

    /// Overwrite `from` on peer-to-peer kinds. Used by relays so a client
    /// cannot speak for another peer.
    pub fn set_sender(&mut self, sender: &PeerId) {
        match self {
            Self::Offer { from, .. }
            | Self::Answer { from, .. }
            | Self::IceCandidate { from, .. }
            | Self::MediaState { from, .. } => *from = sender.clone(),
            _ => {}
        }
    }
}
