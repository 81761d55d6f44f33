//! Transport-engine session interface
//!
//! The call controller only talks to the peer connection through the
//! traits in this module. [`connection`] implements them on top of
//! webrtc-rs; tests substitute recording fakes.

pub mod connection;

pub use connection::{RtpTrackSink, WebRtcSession, WebRtcSessionFactory};

use crate::config::IceConfig;
use crate::media::MediaKind;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::rtp::packet::Packet;

/// Remote or local ICE candidate as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateInit {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Peer connection status reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionStatus {
    /// Statuses after which the call cannot recover and is torn down
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Disconnected | ConnectionStatus::Failed | ConnectionStatus::Closed
        )
    }
}

/// Asynchronous events raised by an engine session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A local candidate was gathered and should be trickled to the caller
    LocalCandidate(CandidateInit),
    /// The connection status changed
    StatusChanged(ConnectionStatus),
    /// The remote peer started sending a track
    RemoteTrack { kind: String, id: String },
    /// The remote peer opened a data channel
    DataChannelOpened { label: String },
}

/// Callback receiving session events. Runs on the engine's own context.
pub type SessionEventHandler = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Outbound packet path for one media kind
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// Write one RTP packet. An error means the sink is gone.
    async fn write_rtp(&self, packet: &Packet) -> Result<()>;
}

/// One peer connection for one call
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Register the event handler, replacing any previous one
    fn on_event(&self, handler: SessionEventHandler);

    /// Add an outbound track for `kind` and return its packet sink
    async fn add_outbound_track(&self, kind: MediaKind) -> Result<Arc<dyn PacketSink>>;

    /// Apply the remote offer
    async fn set_remote_description(&self, offer_sdp: &str) -> Result<()>;

    /// Generate a local answer SDP
    async fn create_answer(&self) -> Result<String>;

    /// Apply a generated answer as the local description
    async fn set_local_description(&self, answer_sdp: &str) -> Result<()>;

    /// Apply a remote ICE candidate
    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<()>;

    /// Close the connection and release its transports
    async fn close(&self) -> Result<()>;
}

/// Creates engine sessions from an ICE configuration
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, config: &IceConfig) -> Result<Arc<dyn EngineSession>>;
}
