//! Per-peer negotiation state machine.
//!
//! Sans-IO: [`ConnectionMachine::handle`] takes one input and returns the
//! actions to perform. The orchestrator performs them against the engine
//! and the transport and feeds the outcomes back in as inputs.

mod types;


pub use types::{MachineAction, MachineInput, NegotiationState, RemovalReason};

use std::mem;

use tracing::{debug, info, warn};
use voxmesh_common::PeerId;

use crate::engine::Connectivity;
use crate::protocol::IceCandidate;

#[derive(Debug)]
pub struct ConnectionMachine {
    local: PeerId,
    remote: PeerId,
    state: NegotiationState,
    /// An engine connection has been requested.
    opened: bool,
    remote_description_set: bool,
    connectivity_confirmed: bool,
    pending_candidates: Vec<IceCandidate>,
    retry_limit: u32,
    retries_left: u32,
    renegotiate_pending: bool,
    last_remote_offer: Option<String>,
    next_timer: u64,
    active_timer: Option<u64>,
}

impl ConnectionMachine {
    pub fn new(local: PeerId, remote: PeerId, retry_limit: u32) -> Self {
        Self {
            local,
            remote,
            state: NegotiationState::Idle,
            opened: false,
            remote_description_set: false,
            connectivity_confirmed: false,
            pending_candidates: Vec::new(),
            retry_limit,
            retries_left: retry_limit,
            renegotiate_pending: false,
            last_remote_offer: None,
            next_timer: 0,
            active_timer: None,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    /// Negotiated and confirmed by the engine.
    pub fn is_connected(&self) -> bool {
        self.state == NegotiationState::Connected && self.connectivity_confirmed
    }

    pub fn handle(&mut self, input: MachineInput) -> Vec<MachineAction> {
        let mut actions = Vec::new();

        match self.state {
            NegotiationState::Closed => {
                debug!(remote = %self.remote, ?input, "input for closed connection");
                return actions;
            }
            NegotiationState::Failed if !matches!(input, MachineInput::Close) => {
                debug!(remote = %self.remote, ?input, "input for failed connection");
                return actions;
            }
            _ => {}
        }

        match input {
            MachineInput::Start { initiate } => self.on_start(initiate, &mut actions),
            MachineInput::RemoteOffer(sdp) => self.on_remote_offer(sdp, &mut actions),
            MachineInput::RemoteAnswer(sdp) => {
                if self.state == NegotiationState::OfferSent {
                    actions.push(MachineAction::ApplyAnswer(sdp));
                } else {
                    debug!(remote = %self.remote, state = ?self.state, "ignoring unexpected answer");
                }
            }
            MachineInput::RemoteCandidate(candidate) => {
                if self.remote_description_set {
                    actions.push(MachineAction::AddCandidates(vec![candidate]));
                } else {
                    self.pending_candidates.push(candidate);
                }
            }
            MachineInput::OfferSent => {
                if self.state == NegotiationState::CreatingOffer {
                    self.state = NegotiationState::OfferSent;
                }
            }
            MachineInput::AnswerSent => {
                if self.state == NegotiationState::OfferReceived {
                    self.remote_description_set = true;
                    self.flush_candidates(&mut actions);
                    if self.connectivity_confirmed {
                        self.become_connected(&mut actions);
                    }
                }
            }
            MachineInput::AnswerApplied => {
                if self.state == NegotiationState::OfferSent {
                    self.remote_description_set = true;
                    self.state = NegotiationState::Connected;
                    self.flush_candidates(&mut actions);
                    if self.connectivity_confirmed {
                        self.become_connected(&mut actions);
                    }
                }
            }
            MachineInput::TracksAttached { renegotiate } => {
                if renegotiate {
                    self.on_renegotiate(&mut actions);
                }
            }
            MachineInput::OperationFailed(reason) => self.fail(&reason, &mut actions),
            MachineInput::Connectivity(connectivity) => {
                self.on_connectivity(connectivity, &mut actions)
            }
            MachineInput::Renegotiate => self.on_renegotiate(&mut actions),
            MachineInput::LocalTracksChanged => {
                if self.opened {
                    actions.push(MachineAction::AttachLocalTracks);
                }
            }
            MachineInput::TimerFired(id) => {
                if self.active_timer == Some(id) {
                    self.active_timer = None;
                    self.fail("negotiation timed out", &mut actions);
                } else {
                    debug!(remote = %self.remote, timer = id, "stale negotiation timer");
                }
            }
            MachineInput::TransportLost => {
                self.state = NegotiationState::Failed;
                self.retries_left = 0;
                self.connectivity_confirmed = false;
                self.disarm_timer(&mut actions);
            }
            MachineInput::Close => {
                self.state = NegotiationState::Closed;
                self.pending_candidates.clear();
                self.disarm_timer(&mut actions);
            }
        }

        actions
    }

    fn on_start(&mut self, initiate: bool, actions: &mut Vec<MachineAction>) {
        if self.state != NegotiationState::Idle {
            return;
        }
        if !self.opened {
            self.opened = true;
            actions.push(MachineAction::Open);
        }
        if initiate {
            self.start_offer(actions);
        } else if self.active_timer.is_none() {
            // The remote is expected to offer; if it never does the timer
            // hands the initiative to this side.
            self.arm_timer(actions);
        }
    }

    fn on_remote_offer(&mut self, sdp: String, actions: &mut Vec<MachineAction>) {
        match self.state {
            NegotiationState::Idle => self.accept_offer(sdp, actions),
            NegotiationState::Connected | NegotiationState::OfferReceived => {
                if self.last_remote_offer.as_deref() == Some(sdp.as_str()) {
                    debug!(remote = %self.remote, "ignoring duplicate offer");
                    return;
                }
                self.accept_offer(sdp, actions);
            }
            NegotiationState::CreatingOffer | NegotiationState::OfferSent => {
                if self.local > self.remote {
                    info!(local = %self.local, remote = %self.remote, "offer collision, rolling back local offer");
                    if self.connectivity_confirmed {
                        // Our own change still needs an offer of its own.
                        self.renegotiate_pending = true;
                    }
                    actions.push(MachineAction::Rollback);
                    self.accept_offer(sdp, actions);
                } else {
                    debug!(local = %self.local, remote = %self.remote, "offer collision, keeping local offer");
                }
            }
            NegotiationState::Failed | NegotiationState::Closed => {}
        }
    }

    fn accept_offer(&mut self, sdp: String, actions: &mut Vec<MachineAction>) {
        if !self.opened {
            self.opened = true;
            actions.push(MachineAction::Open);
        }
        self.state = NegotiationState::OfferReceived;
        self.last_remote_offer = Some(sdp.clone());
        self.arm_timer(actions);
        actions.push(MachineAction::SendAnswer(sdp));
    }

    fn on_connectivity(&mut self, connectivity: Connectivity, actions: &mut Vec<MachineAction>) {
        match connectivity {
            Connectivity::Connected => {
                self.connectivity_confirmed = true;
                self.retries_left = self.retry_limit;
                match self.state {
                    NegotiationState::Connected => self.become_connected(actions),
                    NegotiationState::OfferReceived if self.remote_description_set => {
                        self.become_connected(actions)
                    }
                    _ => {}
                }
            }
            Connectivity::Disconnected | Connectivity::Failed | Connectivity::Closed => {
                self.connectivity_confirmed = false;
                if self.state != NegotiationState::Idle {
                    self.fail(&format!("connectivity {connectivity:?}"), actions);
                }
            }
        }
    }

    fn on_renegotiate(&mut self, actions: &mut Vec<MachineAction>) {
        match self.state {
            NegotiationState::Connected => self.start_offer(actions),
            NegotiationState::Idle
            | NegotiationState::CreatingOffer
            | NegotiationState::OfferSent
            | NegotiationState::OfferReceived => self.renegotiate_pending = true,
            NegotiationState::Failed | NegotiationState::Closed => {}
        }
    }

    fn become_connected(&mut self, actions: &mut Vec<MachineAction>) {
        if self.state != NegotiationState::Connected {
            info!(local = %self.local, remote = %self.remote, "peer connected");
        }
        self.state = NegotiationState::Connected;
        self.disarm_timer(actions);
        if self.renegotiate_pending {
            self.start_offer(actions);
        }
    }

    fn start_offer(&mut self, actions: &mut Vec<MachineAction>) {
        self.renegotiate_pending = false;
        self.state = NegotiationState::CreatingOffer;
        self.arm_timer(actions);
        actions.push(MachineAction::SendOffer);
    }

    fn fail(&mut self, reason: &str, actions: &mut Vec<MachineAction>) {
        warn!(
            local = %self.local,
            remote = %self.remote,
            retries_left = self.retries_left,
            reason,
            "peer negotiation failed"
        );
        self.pending_candidates.clear();
        self.remote_description_set = false;
        self.connectivity_confirmed = false;
        self.renegotiate_pending = false;
        self.last_remote_offer = None;

        if self.retries_left > 0 {
            self.retries_left -= 1;
            self.opened = true;
            actions.push(MachineAction::Open);
            self.start_offer(actions);
        } else {
            self.state = NegotiationState::Failed;
            self.disarm_timer(actions);
            actions.push(MachineAction::Teardown(RemovalReason::Unreachable));
        }
    }

    fn flush_candidates(&mut self, actions: &mut Vec<MachineAction>) {
        if !self.pending_candidates.is_empty() {
            actions.push(MachineAction::AddCandidates(mem::take(
                &mut self.pending_candidates,
            )));
        }
    }

    fn arm_timer(&mut self, actions: &mut Vec<MachineAction>) {
        self.next_timer += 1;
        self.active_timer = Some(self.next_timer);
        actions.push(MachineAction::ArmTimer(self.next_timer));
    }

    fn disarm_timer(&mut self, actions: &mut Vec<MachineAction>) {
        if self.active_timer.take().is_some() {
            actions.push(MachineAction::DisarmTimer);
        }
    }
}
