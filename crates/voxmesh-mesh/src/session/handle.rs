use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use voxmesh_common::{ChannelId, Result, SignalingError, VoxError};

use super::actor::SessionActor;
use super::types::{SessionCommand, SessionContext, SessionSnapshot};
use crate::media::{LocalTrack, MediaSessionController};
use crate::membership::MembershipTracker;
use crate::orchestrator::Orchestrator;
use crate::protocol::SignalMessage;

/// Handle to a joined channel. Dropping it leaves the channel.
pub(crate) struct ChannelSession {
    channel: ChannelId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    disconnected: Arc<AtomicBool>,
}

impl ChannelSession {
    /// Acquire local media, announce the join and start the session task,
    /// then wait for the relay's roster.
    ///
    /// `commands` must already be routed from the transport so that the
    /// roster sent in reply to the join cannot be missed. Media failures
    /// return before anything is sent. A relay refusal, a lost transport or
    /// no answer within the negotiation timeout fails the join and releases
    /// the local media.
    pub(crate) async fn join(
        ctx: &SessionContext,
        channel: ChannelId,
        commands: mpsc::UnboundedSender<SessionCommand>,
        receiver: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<Self> {
        let mut media = MediaSessionController::new(Arc::clone(&ctx.capture));
        media.acquire(ctx.config.media).await?;
        if ctx.config.start_muted {
            media.set_muted(true)?;
        }

        let mut orchestrator = Orchestrator::new(ctx, channel.clone(), commands.clone());
        orchestrator.set_local_media(media.tracks(), media.is_muted(), media.video_enabled());

        let join = SignalMessage::Join {
            channel_id: channel.clone(),
            peer_id: ctx.local.clone(),
        };
        if let Err(e) = ctx.transport.send(join).await {
            media.stop().await;
            return Err(e.into());
        }

        let (joined_tx, joined_rx) = oneshot::channel();
        let disconnected = Arc::new(AtomicBool::new(false));
        let actor = SessionActor {
            channel: channel.clone(),
            local: ctx.local.clone(),
            tracker: MembershipTracker::new(ctx.local.clone()),
            media,
            orchestrator,
            transport: Arc::clone(&ctx.transport),
            events: ctx.events.clone(),
            pending_join: Some(joined_tx),
            disconnected: Arc::clone(&disconnected),
            stopped: false,
        };
        tokio::spawn(actor.run(receiver));

        match tokio::time::timeout(ctx.config.negotiation_timeout, joined_rx).await {
            Ok(Ok(Ok(()))) => {
                info!(channel = %channel, peer = %ctx.local, "joined voice channel");
                Ok(Self {
                    channel,
                    commands,
                    disconnected,
                })
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(VoxError::SessionClosed),
            Err(_) => {
                warn!(channel = %channel, "relay did not answer the join");
                let (reply, done) = oneshot::channel();
                if commands.send(SessionCommand::Leave { reply }).is_ok() {
                    let _ = done.await;
                }
                Err(SignalingError::Timeout.into())
            }
        }
    }

    pub(crate) fn channel_id(&self) -> &ChannelId {
        &self.channel
    }

    /// The signaling transport dropped under this session.
    pub(crate) fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Tear down every peer and stop local media. Returns once done; a
    /// session that is already gone counts as left.
    pub(crate) async fn leave(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(SessionCommand::Leave { reply }).is_ok() {
            let _ = done.await;
        }
    }

    pub(crate) async fn set_muted(&self, muted: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetMuted { muted, reply })
            .await?
    }

    pub(crate) async fn set_video_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetVideo { enabled, reply })
            .await?
    }

    pub(crate) async fn replace_track(&self, track: LocalTrack) -> Result<()> {
        self.request(|reply| SessionCommand::ReplaceTrack { track, reply })
            .await?
    }

    pub(crate) async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| VoxError::SessionClosed)?;
        response.await.map_err(|_| VoxError::SessionClosed)
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        let (reply, _) = oneshot::channel();
        let _ = self.commands.send(SessionCommand::Leave { reply });
    }
}
