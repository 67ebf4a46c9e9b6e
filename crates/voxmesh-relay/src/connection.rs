//! Per-connection handler: bind the peer id, then route messages.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use voxmesh_common::PeerId;
use voxmesh_mesh::SignalMessage;

use crate::hub::RelayHub;

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// Handle a single WebSocket connection.
pub async fn handle_connection(
    ws: WsStream,
    addr: SocketAddr,
    hub: RelayHub,
    handshake_timeout: Duration,
) {
    let (mut sink, mut stream) = ws.split();

    // 1. The first message must be a join; its peer id is bound to this
    //    connection for good.
    let (peer, join) = match read_join(&mut stream, addr, handshake_timeout).await {
        Ok(v) => v,
        Err(reason) => {
            let _ = send_error(&mut sink, reason).await;
            return;
        }
    };

    // 2. Register our receive channel.
    let (tx, mut rx) = mpsc::channel::<String>(256);
    if let Err(e) = hub.register(&peer, tx).await {
        tracing::warn!(peer = %addr, peer_id = %peer, "Rejecting connection: {}", e);
        let _ = send_error(&mut sink, e).await;
        return;
    }
    tracing::info!(peer = %addr, peer_id = %peer, "Client registered");

    hub.route(&peer, join).await;

    // 3. Forwarding loop.
    loop {
        tokio::select! {
            // Deliveries for this client → its WebSocket
            Some(msg) = rx.recv() => {
                if sink.send(Message::Text(msg.into())).await.is_err() {
                    break;
                }
            }

            // Frames from this client → router
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match SignalMessage::from_json(&text) {
                        Ok(message) => hub.route(&peer, message).await,
                        Err(e) => {
                            tracing::debug!(peer_id = %peer, error = %e, "Invalid message");
                            if send_error(&mut sink, &e.to_string()).await.is_err() {
                                break;
                            }
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 4. Cleanup.
    tracing::info!(peer = %addr, peer_id = %peer, "Client disconnected");
    hub.unregister(&peer).await;
}

/// Wait for the opening `join`.
async fn read_join(
    stream: &mut futures_util::stream::SplitStream<WsStream>,
    addr: SocketAddr,
    timeout: Duration,
) -> Result<(PeerId, SignalMessage), &'static str> {
    let frame = tokio::time::timeout(timeout, stream.next()).await;

    match frame {
        Ok(Some(Ok(Message::Text(text)))) => match SignalMessage::from_json(&text) {
            Ok(SignalMessage::Join {
                channel_id,
                peer_id,
            }) => Ok((
                peer_id.clone(),
                SignalMessage::Join {
                    channel_id,
                    peer_id,
                },
            )),
            Ok(other) => {
                tracing::warn!(peer = %addr, kind = other.kind(), "Expected join as first message");
                Err("first message must be a join")
            }
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "Invalid first message");
                Err("invalid message")
            }
        },
        Ok(Some(Ok(_))) => {
            tracing::warn!(peer = %addr, "Expected text join, got binary");
            Err("expected a text frame")
        }
        Ok(Some(Err(e))) => {
            tracing::warn!(peer = %addr, error = %e, "WS error during handshake");
            Err("websocket error")
        }
        Ok(None) => {
            tracing::debug!(peer = %addr, "Connection closed before join");
            Err("closed")
        }
        Err(_) => {
            tracing::warn!(peer = %addr, "Join timeout ({:?})", timeout);
            Err("handshake timeout")
        }
    }
}

/// Send a relay error as a JSON text frame.
async fn send_error(
    sink: &mut futures_util::stream::SplitSink<WsStream, Message>,
    message: &str,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let error = SignalMessage::Error {
        message: message.to_string(),
    };
    let json = match error.to_json() {
        Ok(json) => json,
        Err(e) => e.to_string(),
    };
    sink.send(Message::Text(json.into())).await
}
