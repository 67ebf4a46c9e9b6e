//! Relay-side channel membership and message routing.
//!
//! Pure bookkeeping: callers feed in `(sender, message)` and get back the
//! deliveries to perform. Shared by the in-process [`LoopbackHub`] and the
//! WebSocket relay binary so both implement identical semantics.
//!
//! [`LoopbackHub`]: super::LoopbackHub

use std::collections::HashMap;

use tracing::{debug, info};
use voxmesh_common::{ChannelId, PeerId};

use crate::protocol::SignalMessage;

/// A message the relay must deliver to one connected peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: PeerId,
    pub message: SignalMessage,
}

impl Delivery {
    fn error(to: &PeerId, message: impl Into<String>) -> Self {
        Self {
            to: to.clone(),
            message: SignalMessage::Error {
                message: message.into(),
            },
        }
    }
}

#[derive(Debug)]
pub struct RoomRouter {
    max_peers: usize,
    /// Members per channel in join order.
    rooms: HashMap<ChannelId, Vec<PeerId>>,
    member_of: HashMap<PeerId, ChannelId>,
}

impl RoomRouter {
    pub fn new(max_peers: usize) -> Self {
        Self {
            max_peers,
            rooms: HashMap::new(),
            member_of: HashMap::new(),
        }
    }

    /// Route one message from `sender`. `from` on peer-to-peer kinds is
    /// overwritten with `sender`.
    pub fn route(&mut self, sender: &PeerId, mut message: SignalMessage) -> Vec<Delivery> {
        match message {
            SignalMessage::Join { channel_id, .. } => self.join(sender, channel_id),
            SignalMessage::Leave { ref channel_id, .. } => {
                if self.member_of.get(sender) == Some(channel_id) {
                    self.leave(sender)
                } else {
                    debug!(peer = %sender, channel = %channel_id, "leave for a channel the peer is not in");
                    Vec::new()
                }
            }
            SignalMessage::Offer { .. }
            | SignalMessage::Answer { .. }
            | SignalMessage::IceCandidate { .. }
            | SignalMessage::MediaState { .. } => {
                let Some(channel) = self.member_of.get(sender).cloned() else {
                    return vec![Delivery::error(sender, "not joined to a channel")];
                };
                if message.channel_id() != Some(&channel) {
                    return vec![Delivery::error(
                        sender,
                        format!("not a member of the addressed channel, current channel is {channel}"),
                    )];
                }
                message.set_sender(sender);
                match message.recipient().cloned() {
                    Some(to) if self.member_of.get(&to) == Some(&channel) => {
                        vec![Delivery { to, message }]
                    }
                    Some(to) => {
                        debug!(from = %sender, to = %to, kind = message.kind(), "dropping message for peer outside the channel");
                        Vec::new()
                    }
                    None => self
                        .others(&channel, sender)
                        .into_iter()
                        .map(|to| Delivery {
                            to,
                            message: message.clone(),
                        })
                        .collect(),
                }
            }
            SignalMessage::Roster { .. }
            | SignalMessage::PeerJoined { .. }
            | SignalMessage::PeerLeft { .. }
            | SignalMessage::Error { .. } => {
                vec![Delivery::error(
                    sender,
                    format!("{} is a relay-only message", message.kind()),
                )]
            }
        }
    }

    /// Forget `peer` after its connection dropped.
    pub fn disconnect(&mut self, peer: &PeerId) -> Vec<Delivery> {
        self.leave(peer)
    }

    pub fn members(&self, channel: &ChannelId) -> Vec<PeerId> {
        self.rooms.get(channel).cloned().unwrap_or_default()
    }

    pub fn channel_of(&self, peer: &PeerId) -> Option<&ChannelId> {
        self.member_of.get(peer)
    }

    pub fn channel_count(&self) -> usize {
        self.rooms.len()
    }

    fn join(&mut self, sender: &PeerId, channel: ChannelId) -> Vec<Delivery> {
        if self.member_of.get(sender) == Some(&channel) {
            // Repeated join: answer with the roster again, announce nothing.
            return vec![Delivery {
                to: sender.clone(),
                message: SignalMessage::Roster {
                    peers: self.others(&channel, sender),
                    channel_id: channel,
                },
            }];
        }

        let mut out = self.leave(sender);

        let existing = self.members(&channel);
        if existing.len() >= self.max_peers {
            info!(peer = %sender, channel = %channel, max = self.max_peers, "channel full, refusing join");
            out.push(Delivery::error(
                sender,
                format!("channel {channel} is full ({} peers)", self.max_peers),
            ));
            return out;
        }

        out.push(Delivery {
            to: sender.clone(),
            message: SignalMessage::Roster {
                channel_id: channel.clone(),
                peers: existing.clone(),
            },
        });
        for member in &existing {
            out.push(Delivery {
                to: member.clone(),
                message: SignalMessage::PeerJoined {
                    channel_id: channel.clone(),
                    peer_id: sender.clone(),
                },
            });
        }

        self.rooms
            .entry(channel.clone())
            .or_default()
            .push(sender.clone());
        self.member_of.insert(sender.clone(), channel.clone());
        info!(peer = %sender, channel = %channel, members = existing.len() + 1, "peer joined channel");
        out
    }

    fn leave(&mut self, sender: &PeerId) -> Vec<Delivery> {
        let Some(channel) = self.member_of.remove(sender) else {
            return Vec::new();
        };

        let remaining = match self.rooms.get_mut(&channel) {
            Some(members) => {
                members.retain(|p| p != sender);
                members.clone()
            }
            None => Vec::new(),
        };
        if remaining.is_empty() {
            self.rooms.remove(&channel);
        }

        info!(peer = %sender, channel = %channel, members = remaining.len(), "peer left channel");
        remaining
            .into_iter()
            .map(|to| Delivery {
                to,
                message: SignalMessage::PeerLeft {
                    channel_id: channel.clone(),
                    peer_id: sender.clone(),
                },
            })
            .collect()
    }

    fn others(&self, channel: &ChannelId, sender: &PeerId) -> Vec<PeerId> {
        self.rooms
            .get(channel)
            .map(|members| members.iter().filter(|p| *p != sender).cloned().collect())
            .unwrap_or_default()
    }
}
