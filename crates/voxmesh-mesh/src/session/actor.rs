use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use voxmesh_common::{ChannelId, PeerId, Result, SignalingError, VoxError};

use super::types::{publish, SessionCommand, SessionEvent, SessionSnapshot};
use crate::media::{LocalTrack, MediaSessionController};
use crate::membership::MembershipTracker;
use crate::orchestrator::Orchestrator;
use crate::protocol::SignalMessage;
use crate::signaling::{SignalingTransport, TransportEvent};

/// The task behind a [`ChannelSession`](super::ChannelSession).
///
/// Owns all mutable session state. Commands are processed one at a time,
/// so no two handlers ever touch a peer record concurrently.
pub(crate) struct SessionActor {
    pub channel: ChannelId,
    pub local: PeerId,
    pub tracker: MembershipTracker,
    pub media: MediaSessionController,
    pub orchestrator: Orchestrator,
    pub transport: Arc<dyn SignalingTransport>,
    pub events: mpsc::Sender<SessionEvent>,
    /// Resolved by the relay's answer to our `join`.
    pub pending_join: Option<oneshot::Sender<Result<()>>>,
    /// Set once the transport drops; shared with the session handle.
    pub disconnected: Arc<AtomicBool>,
    pub stopped: bool,
}

impl SessionActor {
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        while let Some(command) = commands.recv().await {
            if let SessionCommand::Leave { reply } = command {
                self.shutdown().await;
                let _ = reply.send(());
                break;
            }
            self.handle(command).await;
            if self.stopped {
                break;
            }
        }
        debug!(channel = %self.channel, "session task stopped");
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Transport(event) => self.on_transport_event(event).await,
            SessionCommand::SetMuted { muted, reply } => {
                let result = self.set_muted(muted).await;
                let _ = reply.send(result);
            }
            SessionCommand::SetVideo { enabled, reply } => {
                let result = self.set_video_enabled(enabled).await;
                let _ = reply.send(result);
            }
            SessionCommand::ReplaceTrack { track, reply } => {
                let result = self.replace_track(track).await;
                let _ = reply.send(result);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::OpFinished {
                peer,
                op_id,
                inputs,
            } => self.orchestrator.on_op_finished(&peer, op_id, inputs).await,
            SessionCommand::Engine { peer, epoch, event } => {
                self.orchestrator.on_engine_event(&peer, epoch, event).await
            }
            SessionCommand::Timeout { peer, timer_id } => {
                self.orchestrator.on_timeout(&peer, timer_id).await
            }
            SessionCommand::Leave { .. } => {}
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => self.on_signal(message).await,
            TransportEvent::Disconnected => {
                if self.disconnected.swap(true, Ordering::SeqCst) {
                    return;
                }
                warn!(channel = %self.channel, "signaling transport lost");
                if self.pending_join.is_some() {
                    self.fail_join(SignalingError::Closed.into()).await;
                    return;
                }
                self.orchestrator.on_transport_lost().await;
                publish(
                    &self.events,
                    SessionEvent::ChannelDisconnected {
                        channel_id: self.channel.clone(),
                    },
                );
            }
            TransportEvent::Connected => {
                debug!(channel = %self.channel, "signaling transport connected");
            }
        }
    }

    async fn on_signal(&mut self, message: SignalMessage) {
        match message {
            SignalMessage::Roster { channel_id, peers } if channel_id == self.channel => {
                if let Some(pending) = self.pending_join.take() {
                    let _ = pending.send(Ok(()));
                }
                let delta = self.tracker.apply_roster(&peers);
                debug!(
                    channel = %self.channel,
                    members = self.tracker.len(),
                    added = delta.added.len(),
                    removed = delta.removed.len(),
                    "roster received"
                );
                self.orchestrator.on_membership_delta(delta).await;
            }
            SignalMessage::PeerJoined {
                channel_id,
                peer_id,
            } if channel_id == self.channel => {
                let delta = self.tracker.peer_joined(&peer_id);
                self.orchestrator.on_membership_delta(delta).await;
            }
            SignalMessage::PeerLeft {
                channel_id,
                peer_id,
            } if channel_id == self.channel => {
                let mut delta = self.tracker.peer_left(&peer_id);
                // A peer can have a record without ever being in our roster.
                if delta.is_empty() && peer_id != self.local {
                    delta.removed.push(peer_id);
                }
                self.orchestrator.on_membership_delta(delta).await;
            }
            SignalMessage::Error { message } => {
                if self.pending_join.is_some() {
                    warn!(channel = %self.channel, %message, "relay refused join");
                    self.fail_join(SignalingError::Refused(message).into()).await;
                } else {
                    warn!(channel = %self.channel, %message, "relay reported an error");
                }
            }
            other => self.orchestrator.on_signaling_message(other).await,
        }
    }

    async fn set_muted(&mut self, muted: bool) -> Result<()> {
        self.media.set_muted(muted)?;
        self.orchestrator
            .on_local_mute_changed(muted, self.media.video_enabled())
            .await;
        Ok(())
    }

    async fn set_video_enabled(&mut self, enabled: bool) -> Result<()> {
        let acquired = self.media.set_video_enabled(enabled).await?;
        if acquired {
            self.orchestrator
                .on_local_media_changed(self.media.tracks())
                .await;
        }
        self.orchestrator
            .on_local_mute_changed(self.media.is_muted(), self.media.video_enabled())
            .await;
        Ok(())
    }

    async fn replace_track(&mut self, track: LocalTrack) -> Result<()> {
        self.media.replace_track(track)?;
        self.orchestrator
            .on_local_media_changed(self.media.tracks())
            .await;
        Ok(())
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            channel_id: self.channel.clone(),
            local_peer: self.local.clone(),
            roster: self.tracker.members(),
            muted: self.media.is_muted(),
            video_enabled: self.media.video_enabled(),
            peers: self.orchestrator.summaries(),
        }
    }

    /// The join never took effect: release local media, report why and stop.
    async fn fail_join(&mut self, error: VoxError) {
        self.orchestrator.leave_channel().await;
        self.media.stop().await;
        self.tracker.clear();
        if let Some(pending) = self.pending_join.take() {
            let _ = pending.send(Err(error));
        }
        self.stopped = true;
    }

    async fn shutdown(&mut self) {
        self.orchestrator.leave_channel().await;
        self.media.stop().await;
        self.tracker.clear();

        if !self.disconnected.load(Ordering::SeqCst) {
            let leave = SignalMessage::Leave {
                channel_id: self.channel.clone(),
                peer_id: self.local.clone(),
            };
            if let Err(e) = self.transport.send(leave).await {
                debug!(channel = %self.channel, error = %e, "failed to send leave");
            }
        }
        info!(channel = %self.channel, "left voice channel");
    }
}
