//! Peer-connection orchestration for one channel session.
//!
//! Keeps one record per remote peer, drives each record's
//! [`ConnectionMachine`] and performs the actions it asks for. Engine work
//! runs on spawned operation tasks, at most one per peer. Inputs that
//! arrive while an operation is in flight wait in the record's backlog,
//! except preemptive ones (timeouts, connectivity loss, teardown).

mod operation;
mod record;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voxmesh_common::{ChannelId, PeerId};
use voxmesh_config::RtcConfig;

use self::operation::{run_operation, OperationContext};
use self::record::{InFlight, PeerRecord};
use crate::engine::{ConnectionEvent, RtcEngine};
use crate::machine::{ConnectionMachine, MachineAction, MachineInput, RemovalReason};
use crate::media::LocalTrack;
use crate::membership::MembershipDelta;
use crate::protocol::SignalMessage;
use crate::session::{publish, PeerSummary, SessionCommand, SessionContext, SessionEvent};
use crate::signaling::SignalingTransport;

pub(crate) struct Orchestrator {
    local: PeerId,
    channel: ChannelId,
    records: HashMap<PeerId, PeerRecord>,
    /// Removed peers whose late messages must not recreate a record.
    ignored: HashMap<PeerId, RemovalReason>,
    local_tracks: Vec<LocalTrack>,
    local_muted: bool,
    local_video: bool,
    engine: Arc<dyn RtcEngine>,
    transport: Arc<dyn SignalingTransport>,
    rtc: Arc<RtcConfig>,
    negotiation_timeout: Duration,
    retry_limit: u32,
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: mpsc::Sender<SessionEvent>,
    next_op: u64,
}

impl Orchestrator {
    pub fn new(
        ctx: &SessionContext,
        channel: ChannelId,
        commands: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        Self {
            local: ctx.local.clone(),
            channel,
            records: HashMap::new(),
            ignored: HashMap::new(),
            local_tracks: Vec::new(),
            local_muted: false,
            local_video: false,
            engine: Arc::clone(&ctx.engine),
            transport: Arc::clone(&ctx.transport),
            rtc: Arc::new(ctx.config.rtc.clone()),
            negotiation_timeout: ctx.config.negotiation_timeout,
            retry_limit: ctx.config.retry_limit,
            commands,
            events: ctx.events.clone(),
            next_op: 0,
        }
    }

    /// Initial local media, before any peer is known.
    pub fn set_local_media(&mut self, tracks: Vec<LocalTrack>, muted: bool, video_enabled: bool) {
        self.local_tracks = tracks;
        self.local_muted = muted;
        self.local_video = video_enabled;
    }

    pub fn summaries(&self) -> Vec<PeerSummary> {
        let mut peers: Vec<PeerSummary> = self.records.values().map(PeerRecord::summary).collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    // -- session inputs ------------------------------------------------------

    pub async fn on_membership_delta(&mut self, delta: MembershipDelta) {
        for peer in delta.removed {
            self.ignored.insert(peer.clone(), RemovalReason::Left);
            self.remove_peer(&peer, RemovalReason::Left).await;
        }
        for peer in delta.added {
            self.ignored.remove(&peer);
            // The lower id offers; the other side waits for its offer.
            let initiate = self.local < peer;
            self.ensure_peer(&peer, initiate).await;
            if self.local_muted || self.local_video {
                self.send_media_state(Some(peer)).await;
            }
        }
    }

    pub async fn on_signaling_message(&mut self, message: SignalMessage) {
        let Some(from) = message.sender().cloned() else {
            return;
        };
        if from == self.local {
            return;
        }
        if message.channel_id() != Some(&self.channel) {
            debug!(peer = %from, kind = message.kind(), "dropping message for another channel");
            return;
        }
        if message.recipient().is_some_and(|to| *to != self.local) {
            debug!(peer = %from, kind = message.kind(), "dropping message addressed elsewhere");
            return;
        }
        if let Some(reason) = self.ignored.get(&from) {
            // A fresh offer from a peer we gave up on is a new attempt.
            let revive =
                *reason == RemovalReason::Unreachable && matches!(message, SignalMessage::Offer { .. });
            if !revive {
                debug!(peer = %from, kind = message.kind(), "ignoring message from removed peer");
                return;
            }
            self.ignored.remove(&from);
        }

        match message {
            SignalMessage::Offer { sdp, .. } => {
                self.ensure_peer(&from, false).await;
                self.submit(&from, MachineInput::RemoteOffer(sdp)).await;
            }
            SignalMessage::Answer { sdp, .. } => {
                if !self.records.contains_key(&from) {
                    debug!(peer = %from, "ignoring answer from unknown peer");
                    return;
                }
                self.submit(&from, MachineInput::RemoteAnswer(sdp)).await;
            }
            SignalMessage::IceCandidate { candidate, .. } => {
                self.ensure_peer(&from, false).await;
                self.submit(&from, MachineInput::RemoteCandidate(candidate))
                    .await;
            }
            SignalMessage::MediaState {
                muted,
                video_enabled,
                ..
            } => {
                self.ensure_peer(&from, false).await;
                if let Some(record) = self.records.get_mut(&from) {
                    record.remote_muted = muted;
                    record.remote_video_enabled = video_enabled;
                }
                self.emit(SessionEvent::RemoteStateChanged {
                    peer_id: from,
                    muted,
                    video_enabled,
                });
            }
            _ => {}
        }
    }

    /// The local track set changed. Every connection gets the new set.
    pub async fn on_local_media_changed(&mut self, tracks: Vec<LocalTrack>) {
        self.local_tracks = tracks;
        for peer in self.peer_ids() {
            self.submit(&peer, MachineInput::LocalTracksChanged).await;
        }
    }

    /// Record the local mute and video flags and announce them to the room.
    pub async fn on_local_mute_changed(&mut self, muted: bool, video_enabled: bool) {
        self.local_muted = muted;
        self.local_video = video_enabled;
        for record in self.records.values_mut() {
            record.local_muted = muted;
        }
        self.send_media_state(None).await;
    }

    pub async fn on_transport_lost(&mut self) {
        for peer in self.peer_ids() {
            self.submit(&peer, MachineInput::TransportLost).await;
        }
    }

    pub async fn leave_channel(&mut self) {
        for peer in self.peer_ids() {
            self.remove_peer(&peer, RemovalReason::LocalLeave).await;
        }
        self.ignored.clear();
    }

    pub async fn on_op_finished(&mut self, peer: &PeerId, op_id: u64, inputs: Vec<MachineInput>) {
        let Some(record) = self.records.get_mut(peer) else {
            return;
        };
        if record.in_flight.as_ref().map(|op| op.op_id) != Some(op_id) {
            debug!(peer = %peer, op_id, "discarding result of cancelled operation");
            return;
        }
        record.in_flight = None;

        let actions: Vec<MachineAction> = inputs
            .into_iter()
            .flat_map(|input| record.machine.handle(input))
            .collect();
        self.execute(peer, actions).await;
        self.drain_backlog(peer).await;
    }

    pub async fn on_engine_event(&mut self, peer: &PeerId, epoch: u64, event: ConnectionEvent) {
        let Some(record) = self.records.get_mut(peer) else {
            return;
        };
        if record.epoch != epoch {
            debug!(peer = %peer, epoch, current = record.epoch, "dropping event from replaced connection");
            return;
        }

        match event {
            ConnectionEvent::LocalCandidate(candidate) => {
                let message = SignalMessage::IceCandidate {
                    channel_id: self.channel.clone(),
                    to: peer.clone(),
                    from: self.local.clone(),
                    candidate,
                };
                if let Err(e) = self.transport.send(message).await {
                    debug!(peer = %peer, error = %e, "failed to send local candidate");
                }
            }
            ConnectionEvent::RemoteStream(stream) => {
                if record.remote_stream.as_ref() == Some(&stream) {
                    return;
                }
                record.remote_stream = Some(stream.clone());
                info!(peer = %peer, stream = %stream, "remote stream available");
                self.emit(SessionEvent::RemoteStreamAvailable {
                    peer_id: peer.clone(),
                    stream,
                });
            }
            ConnectionEvent::Connectivity(connectivity) => {
                self.submit(peer, MachineInput::Connectivity(connectivity))
                    .await;
            }
        }
    }

    pub async fn on_timeout(&mut self, peer: &PeerId, timer_id: u64) {
        self.submit(peer, MachineInput::TimerFired(timer_id)).await;
    }

    // -- record plumbing -----------------------------------------------------

    fn peer_ids(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.records.keys().cloned().collect();
        peers.sort();
        peers
    }

    async fn ensure_peer(&mut self, peer: &PeerId, initiate: bool) {
        let created = !self.records.contains_key(peer);
        if created {
            let machine = ConnectionMachine::new(self.local.clone(), peer.clone(), self.retry_limit);
            self.records
                .insert(peer.clone(), PeerRecord::new(machine, self.local_muted));
            info!(peer = %peer, initiate, "tracking peer");
        }
        if created || initiate {
            self.submit(peer, MachineInput::Start { initiate }).await;
        }
    }

    async fn submit(&mut self, peer: &PeerId, input: MachineInput) {
        let Some(record) = self.records.get_mut(peer) else {
            return;
        };
        if !input.is_preemptive() && record.in_flight.is_some() {
            record.backlog.push_back(input);
            return;
        }
        if matches!(input, MachineInput::TransportLost) {
            record.abort_operation();
            record.backlog.clear();
        }

        let actions = record.machine.handle(input);
        self.execute(peer, actions).await;
        self.drain_backlog(peer).await;
    }

    async fn drain_backlog(&mut self, peer: &PeerId) {
        loop {
            let Some(record) = self.records.get_mut(peer) else {
                return;
            };
            if record.in_flight.is_some() {
                return;
            }
            let Some(input) = record.backlog.pop_front() else {
                return;
            };
            let actions = record.machine.handle(input);
            self.execute(peer, actions).await;
        }
    }

    async fn execute(&mut self, peer: &PeerId, actions: Vec<MachineAction>) {
        let mut batch = Vec::new();
        let mut teardown = None;
        for action in actions {
            match action {
                MachineAction::ArmTimer(timer_id) => self.arm_timer(peer, timer_id),
                MachineAction::DisarmTimer => {
                    if let Some(record) = self.records.get_mut(peer) {
                        record.cancel_timer();
                    }
                }
                MachineAction::Teardown(reason) => teardown = Some(reason),
                other => batch.push(other),
            }
        }

        if let Some(reason) = teardown {
            self.remove_peer(peer, reason).await;
        } else if !batch.is_empty() {
            self.start_op(peer, batch);
        }
    }

    fn start_op(&mut self, peer: &PeerId, batch: Vec<MachineAction>) {
        self.next_op += 1;
        let op_id = self.next_op;
        let Some(record) = self.records.get_mut(peer) else {
            return;
        };

        record.abort_operation();
        if batch.contains(&MachineAction::Open) {
            record.epoch = op_id;
        }

        let ctx = OperationContext {
            local: self.local.clone(),
            peer: peer.clone(),
            channel: self.channel.clone(),
            epoch: record.epoch,
            slot: record.slot.clone(),
            engine: Arc::clone(&self.engine),
            rtc: Arc::clone(&self.rtc),
            transport: Arc::clone(&self.transport),
            tracks: self.local_tracks.clone(),
            commands: self.commands.clone(),
        };
        let commands = self.commands.clone();
        let peer_id = peer.clone();
        let handle = tokio::spawn(async move {
            let inputs = run_operation(ctx, batch).await;
            let _ = commands.send(SessionCommand::OpFinished {
                peer: peer_id,
                op_id,
                inputs,
            });
        });
        record.in_flight = Some(InFlight { op_id, handle });
    }

    fn arm_timer(&mut self, peer: &PeerId, timer_id: u64) {
        let Some(record) = self.records.get_mut(peer) else {
            return;
        };
        record.cancel_timer();

        let commands = self.commands.clone();
        let timeout = self.negotiation_timeout;
        let peer = peer.clone();
        record.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = commands.send(SessionCommand::Timeout { peer, timer_id });
        }));
    }

    /// Close a record's connection and forget it. Emits `PeerRemoved` once;
    /// later calls for the same peer find no record.
    async fn remove_peer(&mut self, peer: &PeerId, reason: RemovalReason) {
        let Some(mut record) = self.records.remove(peer) else {
            return;
        };
        record.machine.handle(MachineInput::Close);
        record.abort_operation();
        record.cancel_timer();
        if let Some(conn) = record.slot.take() {
            if let Err(e) = conn.close().await {
                debug!(peer = %peer, error = %e, "error closing peer connection");
            }
        }

        if reason == RemovalReason::Unreachable {
            warn!(peer = %peer, "peer unreachable, giving up");
            self.ignored.insert(peer.clone(), reason);
        } else {
            info!(peer = %peer, %reason, "peer removed");
        }
        self.emit(SessionEvent::PeerRemoved {
            peer_id: peer.clone(),
            reason,
        });
    }

    async fn send_media_state(&self, to: Option<PeerId>) {
        let message = SignalMessage::MediaState {
            channel_id: self.channel.clone(),
            from: self.local.clone(),
            to,
            muted: self.local_muted,
            video_enabled: self.local_video,
        };
        if let Err(e) = self.transport.send(message).await {
            debug!(error = %e, "failed to announce media state");
        }
    }

    fn emit(&self, event: SessionEvent) {
        publish(&self.events, event);
    }
}
