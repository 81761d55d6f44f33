//! webrtc-rs backed engine session

use super::{
    CandidateInit, ConnectionStatus, EngineSession, PacketSink, SessionEvent, SessionEventHandler,
    SessionFactory,
};
use crate::config::IceConfig;
use crate::media::MediaKind;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

type HandlerSlot = Arc<Mutex<Option<SessionEventHandler>>>;

/// Creates [`WebRtcSession`]s with default codecs and interceptors
#[derive(Debug, Default, Clone)]
pub struct WebRtcSessionFactory;

impl WebRtcSessionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionFactory for WebRtcSessionFactory {
    async fn create(&self, config: &IceConfig) -> Result<Arc<dyn EngineSession>> {
        let session = WebRtcSession::new(config).await?;
        Ok(Arc::new(session))
    }
}

/// Engine session wrapping one `RTCPeerConnection`
pub struct WebRtcSession {
    peer_connection: Arc<RTCPeerConnection>,
    handler: HandlerSlot,
}

impl WebRtcSession {
    /// Create a peer connection and wire its callbacks to the handler slot
    #[instrument(skip(config), fields(ice_servers = config.ice_servers.len()))]
    pub async fn new(config: &IceConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();

        // H264 and Opus are part of the default codec set
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
            })?);

        let session = Self {
            peer_connection,
            handler: Arc::new(Mutex::new(None)),
        };
        session.install_callbacks();

        debug!("Peer connection created");
        Ok(session)
    }

    /// Underlying peer connection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    fn install_callbacks(&self) {
        let slot = Arc::clone(&self.handler);
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                // None marks the end of gathering
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => emit(
                            &slot,
                            SessionEvent::LocalCandidate(CandidateInit {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            }),
                        ),
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    }
                }
                Box::pin(async {})
            }));

        let slot = Arc::clone(&self.handler);
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                info!("PeerConnection state: {}", s);
                if let Some(status) = map_state(s) {
                    emit(&slot, SessionEvent::StatusChanged(status));
                }
                Box::pin(async {})
            }));

        let slot = Arc::clone(&self.handler);
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                emit(
                    &slot,
                    SessionEvent::RemoteTrack {
                        kind: track.kind().to_string(),
                        id: track.id(),
                    },
                );
                Box::pin(async {})
            },
        ));

        let slot = Arc::clone(&self.handler);
        self.peer_connection
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let label = dc.label().to_string();
                emit(
                    &slot,
                    SessionEvent::DataChannelOpened {
                        label: label.clone(),
                    },
                );

                Box::pin(async move {
                    dc.on_message(Box::new(move |msg: DataChannelMessage| {
                        info!(
                            channel = %label,
                            message = %String::from_utf8_lossy(&msg.data),
                            "Message from data channel"
                        );
                        Box::pin(async {})
                    }));
                })
            }));
    }
}

#[async_trait]
impl EngineSession for WebRtcSession {
    fn on_event(&self, handler: SessionEventHandler) {
        *self.handler.lock() = Some(handler);
    }

    async fn add_outbound_track(&self, kind: MediaKind) -> Result<Arc<dyn PacketSink>> {
        info!("Adding {} track", kind);

        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: kind.mime_type().to_string(),
                clock_rate: kind.clock_rate(),
                channels: kind.channels(),
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            kind.track_id().to_string(),
            kind.stream_id().to_string(),
        ));

        let sender = self
            .peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to add {} track: {}", kind, e)))?;

        // Interceptors only run while RTCP is read; ends when the sender closes
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
            debug!("RTCP reader for {} track finished", kind);
        });

        Ok(Arc::new(RtpTrackSink { track }))
    }

    async fn set_remote_description(&self, offer_sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(offer_sdp.to_string())
            .map_err(|e| {
                Error::RemoteDescriptionError(format!("Failed to parse offer: {}", e))
            })?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| {
                Error::RemoteDescriptionError(format!("Failed to set remote description: {}", e))
            })
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        Ok(answer.sdp)
    }

    async fn set_local_description(&self, answer_sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(answer_sdp.to_string())
            .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection");

        self.peer_connection.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })
    }
}

/// Outbound RTP track as a [`PacketSink`]
pub struct RtpTrackSink {
    track: Arc<TrackLocalStaticRTP>,
}

impl RtpTrackSink {
    pub fn track(&self) -> Arc<TrackLocalStaticRTP> {
        Arc::clone(&self.track)
    }
}

#[async_trait]
impl PacketSink for RtpTrackSink {
    async fn write_rtp(&self, packet: &Packet) -> Result<()> {
        self.track
            .write_rtp(packet)
            .await
            .map(|_| ())
            .map_err(|e| Error::MediaTrackError(format!("Failed to write to track: {}", e)))
    }
}

fn emit(slot: &HandlerSlot, event: SessionEvent) {
    // Clone out so the handler never runs under the slot lock
    let handler = slot.lock().clone();
    if let Some(handler) = handler {
        handler(event);
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionStatus> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionStatus::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionStatus::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionStatus::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionStatus::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionStatus::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionStatus::Closed),
        _ => None,
    }
}

fn ice_servers(config: &IceConfig) -> Vec<RTCIceServer> {
    config
        .ice_servers
        .iter()
        .map(|server| {
            RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            }
        })
        .collect()
}
