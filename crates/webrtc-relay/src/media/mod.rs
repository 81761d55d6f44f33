//! Local media plumbing: pipeline processes and the RTP relay pumps that
//! feed their output into the peer connection.

pub mod process;
pub mod relay;

pub use process::{GstLauncher, PipelineLauncher, PipelineProcess, StopOutcome, SupervisedProcess};
pub use relay::{pump_rtp, RelayExit, RtpRelay};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of media relayed for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// H.264 video, 90 kHz clock
    Video,
    /// Opus audio, 48 kHz clock
    Audio,
}

impl MediaKind {
    /// Codec MIME type of the outbound track
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaKind::Video => "video/H264",
            MediaKind::Audio => "audio/opus",
        }
    }

    /// RTP clock rate in Hz
    pub fn clock_rate(&self) -> u32 {
        match self {
            MediaKind::Video => 90000,
            MediaKind::Audio => 48000,
        }
    }

    /// Channel count advertised for the codec (0 for video)
    pub fn channels(&self) -> u16 {
        match self {
            MediaKind::Video => 0,
            MediaKind::Audio => 2,
        }
    }

    /// Track identifier
    pub fn track_id(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// Stream identifier the browser sees
    pub fn stream_id(&self) -> &'static str {
        match self {
            MediaKind::Video => "pi-h264",
            MediaKind::Audio => "pi-opus",
        }
    }

    /// Default receive buffer size for relayed datagrams
    pub fn default_mtu(&self) -> usize {
        match self {
            MediaKind::Video => 1400,
            MediaKind::Audio => 1200,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.track_id())
    }
}
