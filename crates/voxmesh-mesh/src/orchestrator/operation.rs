//! Engine operations, run off the session task.
//!
//! One operation executes a batch of machine actions in order against one
//! peer's connection and reports the outcomes as machine inputs.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;
use voxmesh_common::{ChannelId, EngineError, PeerId, VoxError};
use voxmesh_config::RtcConfig;

use super::record::ConnectionSlot;
use crate::engine::{EngineEventSink, PeerConnection, RtcEngine, SessionDescription};
use crate::machine::{MachineAction, MachineInput};
use crate::media::LocalTrack;
use crate::protocol::SignalMessage;
use crate::session::SessionCommand;
use crate::signaling::SignalingTransport;

pub(crate) struct OperationContext {
    pub local: PeerId,
    pub peer: PeerId,
    pub channel: ChannelId,
    pub epoch: u64,
    pub slot: ConnectionSlot,
    pub engine: Arc<dyn RtcEngine>,
    pub rtc: Arc<RtcConfig>,
    pub transport: Arc<dyn SignalingTransport>,
    pub tracks: Vec<LocalTrack>,
    pub commands: mpsc::UnboundedSender<SessionCommand>,
}

pub(crate) async fn run_operation(
    ctx: OperationContext,
    batch: Vec<MachineAction>,
) -> Vec<MachineInput> {
    let mut inputs = Vec::new();
    for action in batch {
        if let Err(e) = run_action(&ctx, action, &mut inputs).await {
            inputs.push(MachineInput::OperationFailed(e.to_string()));
            break;
        }
    }
    inputs
}

async fn run_action(
    ctx: &OperationContext,
    action: MachineAction,
    inputs: &mut Vec<MachineInput>,
) -> Result<(), VoxError> {
    match action {
        MachineAction::Open => open(ctx).await?,
        MachineAction::Rollback => connection(ctx)?.rollback_local_description().await?,
        MachineAction::SendOffer => {
            let conn = connection(ctx)?;
            let offer = conn.create_offer().await?;
            conn.set_local_description(offer.clone()).await?;
            ctx.transport
                .send(SignalMessage::Offer {
                    channel_id: ctx.channel.clone(),
                    to: ctx.peer.clone(),
                    from: ctx.local.clone(),
                    sdp: offer.sdp,
                })
                .await?;
            inputs.push(MachineInput::OfferSent);
        }
        MachineAction::SendAnswer(sdp) => {
            let conn = connection(ctx)?;
            conn.set_remote_description(SessionDescription::offer(sdp))
                .await?;
            let answer = conn.create_answer().await?;
            conn.set_local_description(answer.clone()).await?;
            ctx.transport
                .send(SignalMessage::Answer {
                    channel_id: ctx.channel.clone(),
                    to: ctx.peer.clone(),
                    from: ctx.local.clone(),
                    sdp: answer.sdp,
                })
                .await?;
            inputs.push(MachineInput::AnswerSent);
        }
        MachineAction::ApplyAnswer(sdp) => {
            connection(ctx)?
                .set_remote_description(SessionDescription::answer(sdp))
                .await?;
            inputs.push(MachineInput::AnswerApplied);
        }
        MachineAction::AddCandidates(candidates) => {
            let conn = connection(ctx)?;
            for candidate in candidates {
                // Stale candidates of a replaced connection land here.
                if let Err(e) = conn.add_ice_candidate(candidate).await {
                    debug!(peer = %ctx.peer, error = %e, "ignoring rejected remote candidate");
                }
            }
        }
        MachineAction::AttachLocalTracks => {
            let conn = connection(ctx)?;
            let mut renegotiate = false;
            for track in &ctx.tracks {
                renegotiate |= conn.attach_track(track).await?;
            }
            inputs.push(MachineInput::TracksAttached { renegotiate });
        }
        MachineAction::ArmTimer(_) | MachineAction::DisarmTimer | MachineAction::Teardown(_) => {}
    }
    Ok(())
}

async fn open(ctx: &OperationContext) -> Result<(), VoxError> {
    if let Some(previous) = ctx.slot.take() {
        if let Err(e) = previous.close().await {
            debug!(peer = %ctx.peer, error = %e, "error closing replaced connection");
        }
    }

    let sink = EngineEventSink::new(ctx.peer.clone(), ctx.epoch, ctx.commands.clone());
    let conn = ctx
        .engine
        .create_connection(&ctx.peer, &ctx.rtc, sink)
        .await?;
    ctx.slot.replace(Arc::clone(&conn));

    for track in &ctx.tracks {
        conn.attach_track(track).await?;
    }
    debug!(peer = %ctx.peer, epoch = ctx.epoch, "opened peer connection");
    Ok(())
}

fn connection(ctx: &OperationContext) -> Result<Arc<dyn PeerConnection>, EngineError> {
    ctx.slot.get().ok_or(EngineError::Closed)
}
