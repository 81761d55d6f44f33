//! Signaling channel and wire protocol for SDP/ICE exchange

pub mod client;
pub mod protocol;

pub use client::{SignalingChannel, WebSocketSignaling};
pub use protocol::{ClientMessage, Inbound, WebrtcSignal};
