//! Single-peer WebRTC media relay
//!
//! Relays locally captured H.264 video and Opus audio to one browser peer.
//! An external pipeline (gst-launch by default) encodes media and sends RTP
//! over loopback UDP; relay pumps forward those packets into the outbound
//! tracks of a peer connection negotiated over a WebSocket signaling server.
//!
//! # Components
//!
//! - [`session::CallController`]: the call state machine. One call at a
//!   time; a new offer replaces the current call.
//! - [`media::relay`]: UDP to track packet pumps
//! - [`media::process`]: pipeline process supervision with bounded stop
//! - [`peer`]: the engine session interface and its webrtc-rs backend
//! - [`signaling`]: wire format and the WebSocket channel
//!
//! # Example
//!
//! ```no_run
//! use remotemedia_webrtc_relay::{
//!     CallController, GstLauncher, RelayConfig, WebRtcSessionFactory, WebSocketSignaling,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> remotemedia_webrtc_relay::Result<()> {
//! let config = Arc::new(RelayConfig::default());
//! let signaling = Arc::new(WebSocketSignaling::connect(&config.signaling_url, None).await?);
//!
//! let controller = CallController::new(
//!     Arc::clone(&config),
//!     Arc::new(WebRtcSessionFactory::new()),
//!     Arc::new(GstLauncher::from_config(&config.media)),
//!     signaling,
//!     CancellationToken::new(),
//! );
//! controller.run().await
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::{IceConfig, IceServer, MediaConfig, RelayConfig};
pub use error::{Error, Result};
pub use media::{GstLauncher, MediaKind, PipelineLauncher, RelayExit, StopOutcome};
pub use peer::{WebRtcSession, WebRtcSessionFactory};
pub use session::{CallController, CallPhase, CallSnapshot};
pub use signaling::{ClientMessage, SignalingChannel, WebSocketSignaling};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
