//! Roster tracking for the joined channel.

use std::collections::BTreeSet;

use voxmesh_common::PeerId;

/// Peers that entered or left the roster in one update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    pub added: Vec<PeerId>,
    pub removed: Vec<PeerId>,
}

impl MembershipDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Remote members of one channel. The local peer is never tracked, and a
/// peer is never reported added twice without a removal in between.
#[derive(Debug)]
pub struct MembershipTracker {
    local: PeerId,
    members: BTreeSet<PeerId>,
}

impl MembershipTracker {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            members: BTreeSet::new(),
        }
    }

    /// Replace the roster with a full snapshot and report the difference.
    pub fn apply_roster(&mut self, peers: &[PeerId]) -> MembershipDelta {
        let incoming: BTreeSet<PeerId> = peers
            .iter()
            .filter(|p| **p != self.local)
            .cloned()
            .collect();

        let added = incoming.difference(&self.members).cloned().collect();
        let removed = self.members.difference(&incoming).cloned().collect();
        self.members = incoming;
        MembershipDelta { added, removed }
    }

    pub fn peer_joined(&mut self, peer: &PeerId) -> MembershipDelta {
        if *peer == self.local || !self.members.insert(peer.clone()) {
            return MembershipDelta::default();
        }
        MembershipDelta {
            added: vec![peer.clone()],
            removed: Vec::new(),
        }
    }

    pub fn peer_left(&mut self, peer: &PeerId) -> MembershipDelta {
        if !self.members.remove(peer) {
            return MembershipDelta::default();
        }
        MembershipDelta {
            added: Vec::new(),
            removed: vec![peer.clone()],
        }
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.members.contains(peer)
    }

    /// Current members in id order.
    pub fn members(&self) -> Vec<PeerId> {
        self.members.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}
