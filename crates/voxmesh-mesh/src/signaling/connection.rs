//! Background WebSocket connection loop with auto-reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::transport::TransportEvent;
use super::types::{SignalingCommand, SignalingConfig};
use crate::protocol::SignalMessage;

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

pub(crate) async fn connection_loop(
    config: SignalingConfig,
    connected: Arc<RwLock<bool>>,
    stopped: Arc<AtomicBool>,
    event_tx: mpsc::Sender<TransportEvent>,
    command_rx: mpsc::Receiver<SignalingCommand>,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    let mut reconnect_delay = config.reconnect_delay_secs;

    while !stopped.load(Ordering::SeqCst) {
        info!(url = %config.url, "connecting to signaling relay");

        match tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs),
            tokio_tungstenite::connect_async(config.url.as_str()),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                *connected.write().await = true;
                let _ = event_tx.send(TransportEvent::Connected).await;

                let (ws_write, mut ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&ws_write),
                    config.heartbeat_interval_secs,
                ));
                let cmd_handle = tokio::spawn(command_forwarder(
                    Arc::clone(&command_rx),
                    Arc::clone(&ws_write),
                    Arc::clone(&stopped),
                ));

                while let Some(msg_result) = ws_read.next().await {
                    match msg_result {
                        Ok(WsMessage::Text(text)) => match SignalMessage::from_json(&text) {
                            Ok(message) => {
                                if event_tx
                                    .send(TransportEvent::Message(message))
                                    .await
                                    .is_err()
                                {
                                    stopped.store(true, Ordering::SeqCst);
                                    break;
                                }
                            }
                            Err(e) => debug!(error = %e, "ignoring unrecognized signaling frame"),
                        },
                        Ok(WsMessage::Close(_)) => {
                            info!("signaling relay closed connection");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "signaling websocket error");
                            break;
                        }
                        _ => {}
                    }
                }

                heartbeat_handle.abort();
                cmd_handle.abort();
                *connected.write().await = false;
                let _ = event_tx.send(TransportEvent::Disconnected).await;
            }
            Ok(Err(e)) => {
                error!(error = %e, "failed to connect to signaling relay");
            }
            Err(_elapsed) => {
                error!(
                    timeout_secs = config.connect_timeout_secs,
                    "signaling connection timed out"
                );
            }
        }

        if stopped.load(Ordering::SeqCst) || event_tx.is_closed() {
            break;
        }

        info!(delay = reconnect_delay, "reconnecting to signaling relay");
        tokio::time::sleep(Duration::from_secs(reconnect_delay)).await;
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay_secs);
    }

    debug!("signaling connection loop stopped");
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, interval_secs: u64)
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.tick().await;
    loop {
        interval.tick().await;
        let mut writer = ws_write.lock().await;
        if writer.send(WsMessage::Ping(Default::default())).await.is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Command Forwarder
// ---------------------------------------------------------------------------

async fn command_forwarder<S>(
    cmd_rx: Arc<Mutex<mpsc::Receiver<SignalingCommand>>>,
    cmd_write: Arc<Mutex<S>>,
    stopped: Arc<AtomicBool>,
) where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut rx = cmd_rx.lock().await;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            SignalingCommand::Send(json) => {
                let mut writer = cmd_write.lock().await;
                if writer.send(WsMessage::Text(json.into())).await.is_err() {
                    warn!("failed to write signaling frame");
                }
            }
            SignalingCommand::Disconnect => {
                stopped.store(true, Ordering::SeqCst);
                let mut writer = cmd_write.lock().await;
                let _ = writer.send(WsMessage::Close(None)).await;
                return;
            }
        }
    }
}
