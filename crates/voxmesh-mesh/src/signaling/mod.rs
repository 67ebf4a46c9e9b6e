//! Signaling transports.
//!
//! A transport is an ordered message pipe to the relay. It carries no
//! protocol logic: the relay side is [`RoomRouter`], the client side is the
//! channel session.

mod client;
mod connection;
mod loopback;
mod router;
mod transport;
mod types;

pub use client::WsSignalingClient;
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use router::{Delivery, RoomRouter};
pub use transport::{SignalingTransport, TransportEvent};
pub use types::SignalingConfig;
