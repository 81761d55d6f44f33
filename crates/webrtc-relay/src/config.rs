//! Configuration types for the WebRTC relay

use crate::media::MediaKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// STUN server used when no other ICE configuration is usable
pub const FALLBACK_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Program that runs pipeline descriptions
pub const DEFAULT_PIPELINE_PROGRAM: &str = "gst-launch-1.0";

/// Main configuration for the relay, built once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// WebSocket signaling server URL (ws:// or wss://)
    pub signaling_url: String,

    /// `Origin` header sent when dialing the signaling server
    pub signaling_origin: Option<String>,

    /// Primary transport configuration (ICE servers)
    pub ice: IceConfig,

    /// Media pipeline and relay settings
    pub media: MediaConfig,

    /// Upper bound on joining relay pumps during teardown
    pub pump_join_timeout_ms: u64,
}

/// Media pipeline and relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Executable that runs pipeline descriptions
    pub pipeline_program: String,

    /// Arguments placed before the description (`-e` sends EOS on interrupt)
    pub pipeline_leading_args: Vec<String>,

    /// Video pipeline override (default pipeline targets `video_port`)
    pub video_pipeline: Option<String>,

    /// Audio pipeline override (default pipeline targets `audio_port`)
    pub audio_pipeline: Option<String>,

    /// Skip audio entirely: no process, no track, no pump
    pub audio_disabled: bool,

    /// Host the relay pumps bind on
    pub relay_host: String,

    /// UDP port the video pipeline sends RTP to
    pub video_port: u16,

    /// UDP port the audio pipeline sends RTP to
    pub audio_port: u16,

    /// Receive buffer size for video datagrams
    pub video_mtu: usize,

    /// Receive buffer size for audio datagrams
    pub audio_mtu: usize,

    /// Grace period between interrupt and kill when stopping a pipeline
    pub stop_grace_ms: u64,
}

/// ICE configuration handed to the transport engine
///
/// Matches the JSON served by the RTC config endpoint:
/// `{"iceServers":[{"urls":["turn:..."],"username":"u","credential":"c"}]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceConfig {
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<IceServer>,
}

/// One STUN or TURN server entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

impl IceConfig {
    /// Minimal configuration with the public STUN server only
    pub fn stun_only() -> Self {
        Self::from_stun_servers(&[FALLBACK_STUN_SERVER.to_string()])
    }

    /// One ICE server entry per STUN URL
    pub fn from_stun_servers(urls: &[String]) -> Self {
        Self {
            ice_servers: urls
                .iter()
                .map(|url| IceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
        }
    }

    /// Fetch the ICE configuration from an HTTP endpoint
    ///
    /// # Errors
    ///
    /// Returns `ConfigFetchError` on transport failure, a non-200 status,
    /// or a body that is not an ICE configuration.
    pub async fn fetch(url: &str) -> Result<Self> {
        debug!("Fetching RTC config from {}", url);

        let resp = reqwest::get(url)
            .await
            .map_err(|e| Error::ConfigFetchError(format!("rtc-config request failed: {}", e)))?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(Error::ConfigFetchError(format!(
                "rtc-config bad status: {}",
                resp.status()
            )));
        }

        resp.json::<IceConfig>()
            .await
            .map_err(|e| Error::ConfigFetchError(format!("decode rtc-config: {}", e)))
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            pipeline_program: DEFAULT_PIPELINE_PROGRAM.to_string(),
            pipeline_leading_args: vec!["-e".to_string()],
            video_pipeline: None,
            audio_pipeline: None,
            audio_disabled: false,
            relay_host: "127.0.0.1".to_string(),
            video_port: 5004,
            audio_port: 5006,
            video_mtu: MediaKind::Video.default_mtu(),
            audio_mtu: MediaKind::Audio.default_mtu(),
            stop_grace_ms: 2000,
        }
    }
}

impl MediaConfig {
    /// Media kinds started for every call
    pub fn enabled_kinds(&self) -> Vec<MediaKind> {
        if self.audio_disabled {
            vec![MediaKind::Video]
        } else {
            vec![MediaKind::Video, MediaKind::Audio]
        }
    }

    /// UDP port the relay for `kind` listens on
    pub fn port(&self, kind: MediaKind) -> u16 {
        match kind {
            MediaKind::Video => self.video_port,
            MediaKind::Audio => self.audio_port,
        }
    }

    /// Bind address of the relay for `kind`
    pub fn relay_addr(&self, kind: MediaKind) -> String {
        format!("{}:{}", self.relay_host, self.port(kind))
    }

    /// Receive buffer size for `kind`
    pub fn mtu(&self, kind: MediaKind) -> usize {
        match kind {
            MediaKind::Video => self.video_mtu,
            MediaKind::Audio => self.audio_mtu,
        }
    }

    /// Pipeline description for `kind`: the override if set, otherwise the
    /// default capture/encode pipeline sending RTP to the relay port
    pub fn pipeline(&self, kind: MediaKind) -> String {
        let custom = match kind {
            MediaKind::Video => self.video_pipeline.as_ref(),
            MediaKind::Audio => self.audio_pipeline.as_ref(),
        };

        match custom {
            Some(p) if !p.trim().is_empty() => p.clone(),
            _ => default_pipeline(kind, &self.relay_host, self.port(kind)),
        }
    }

    /// Interrupt-to-kill grace period
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Default capture/encode pipeline for `kind`
pub fn default_pipeline(kind: MediaKind, host: &str, port: u16) -> String {
    match kind {
        MediaKind::Video => format!(
            "libcamerasrc ! video/x-raw,width=640,height=480,framerate=30/1 ! videoconvert ! \
             x264enc tune=zerolatency bitrate=800 speed-preset=ultrafast key-int-max=60 ! \
             h264parse config-interval=1 ! rtph264pay pt=96 config-interval=1 ! \
             udpsink host={} port={}",
            host, port
        ),
        MediaKind::Audio => format!(
            "alsasrc ! audioconvert ! audioresample ! opusenc bitrate=24000 ! \
             rtpopuspay pt=111 ! udpsink host={} port={}",
            host, port
        ),
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            signaling_origin: None,
            ice: IceConfig::stun_only(),
            media: MediaConfig::default(),
            pump_join_timeout_ms: 1000,
        }
    }
}

impl RelayConfig {
    /// Bound on joining relay pumps during teardown
    pub fn pump_join_timeout(&self) -> Duration {
        Duration::from_millis(self.pump_join_timeout_ms)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a WebSocket URL
    /// - the ICE server list is empty
    /// - a relay port is zero, or both ports collide while audio is enabled
    /// - an MTU cannot hold an RTP header
    pub fn validate(&self) -> Result<()> {
        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.ice.ice_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one ICE server is required".to_string(),
            ));
        }

        for kind in self.media.enabled_kinds() {
            if self.media.port(kind) == 0 {
                return Err(Error::InvalidConfig(format!("{} port must be non-zero", kind)));
            }

            // 12 bytes is the fixed RTP header
            if self.media.mtu(kind) < 12 {
                return Err(Error::InvalidConfig(format!(
                    "{} mtu must be at least 12, got {}",
                    kind,
                    self.media.mtu(kind)
                )));
            }
        }

        if !self.media.audio_disabled && self.media.video_port == self.media.audio_port {
            return Err(Error::InvalidConfig(format!(
                "video and audio ports must differ, both are {}",
                self.media.video_port
            )));
        }

        if self.media.pipeline_program.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "pipeline_program cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
