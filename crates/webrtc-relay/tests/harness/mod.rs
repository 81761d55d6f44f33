//! Recording fakes for driving the call controller without a network,
//! a browser, or pipeline processes

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use remotemedia_webrtc_relay::config::{IceConfig, IceServer, MediaConfig, RelayConfig};
use remotemedia_webrtc_relay::media::{MediaKind, PipelineLauncher, StopOutcome, SupervisedProcess};
use remotemedia_webrtc_relay::peer::{
    CandidateInit, EngineSession, PacketSink, SessionEvent, SessionEventHandler, SessionFactory,
};
use remotemedia_webrtc_relay::signaling::{ClientMessage, SignalingChannel, WebrtcSignal};
use remotemedia_webrtc_relay::{CallController, Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use bytes::Bytes;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::util::Marshal;

pub const PRIMARY_TURN: &str = "turn:turn.example.com:3478";

/// Controller config with ephemeral relay ports and a TURN primary
pub fn test_config() -> RelayConfig {
    RelayConfig {
        signaling_url: "ws://127.0.0.1:1/ws".to_string(),
        ice: IceConfig {
            ice_servers: vec![IceServer {
                urls: vec![PRIMARY_TURN.to_string()],
                username: "user".to_string(),
                credential: "pass".to_string(),
            }],
        },
        media: MediaConfig {
            video_port: 0,
            audio_port: 0,
            stop_grace_ms: 200,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn offer(from: &str, sdp: &str) -> ClientMessage {
    ClientMessage {
        signal: Some(WebrtcSignal {
            kind: "offer".to_string(),
            sdp: sdp.to_string(),
            ..Default::default()
        }),
        to: String::new(),
        from: from.to_string(),
    }
}

pub fn remote_candidate(from: &str, n: u32) -> ClientMessage {
    ClientMessage {
        signal: Some(WebrtcSignal {
            candidate: candidate_line(n),
            sdp_mid: "0".to_string(),
            sdp_mline_index: Some(0),
            ..Default::default()
        }),
        to: String::new(),
        from: from.to_string(),
    }
}

pub fn candidate_line(n: u32) -> String {
    format!("candidate:{} 1 udp 2122260223 10.0.0.{} 5000{} typ host", n, n, n)
}

pub fn candidate_init(n: u32) -> CandidateInit {
    CandidateInit {
        candidate: candidate_line(n),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Failure switches applied to every session the factory creates
#[derive(Clone, Default)]
pub struct SessionBehavior {
    pub fail_add_track: bool,
    pub fail_set_remote: bool,
    pub fail_create_answer: bool,
    pub fail_candidates: bool,
    /// `set_remote_description` parks until notified
    pub set_remote_gate: Option<Arc<Notify>>,
    /// Outbound sinks never finish a write
    pub stall_writes: bool,
}

pub struct FakeSession {
    pub id: usize,
    pub config: IceConfig,
    behavior: SessionBehavior,
    handler: Mutex<Option<SessionEventHandler>>,
    pub tracks: Mutex<Vec<MediaKind>>,
    pub remote_sdp: Mutex<Option<String>>,
    pub local_sdp: Mutex<Option<String>>,
    pub candidates: Mutex<Vec<CandidateInit>>,
    pub sinks: Mutex<Vec<Arc<FakeSink>>>,
    pub close_count: AtomicUsize,
}

impl FakeSession {
    /// Raise an engine event as the engine would
    pub fn emit(&self, event: SessionEvent) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn closes(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn applied_candidates(&self) -> Vec<CandidateInit> {
        self.candidates.lock().clone()
    }
}

#[async_trait]
impl EngineSession for FakeSession {
    fn on_event(&self, handler: SessionEventHandler) {
        *self.handler.lock() = Some(handler);
    }

    async fn add_outbound_track(&self, kind: MediaKind) -> Result<Arc<dyn PacketSink>> {
        if self.behavior.fail_add_track {
            return Err(Error::MediaTrackError("track rejected".to_string()));
        }
        self.tracks.lock().push(kind);
        let sink = Arc::new(FakeSink {
            stall: self.behavior.stall_writes,
            ..Default::default()
        });
        self.sinks.lock().push(Arc::clone(&sink));
        Ok(sink)
    }

    async fn set_remote_description(&self, offer_sdp: &str) -> Result<()> {
        *self.remote_sdp.lock() = Some(offer_sdp.to_string());

        if let Some(gate) = &self.behavior.set_remote_gate {
            gate.notified().await;
        }

        if self.behavior.fail_set_remote {
            return Err(Error::RemoteDescriptionError("bad offer".to_string()));
        }
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        if self.behavior.fail_create_answer {
            return Err(Error::SdpError("no answer".to_string()));
        }
        Ok(format!("answer-{}", self.id))
    }

    async fn set_local_description(&self, answer_sdp: &str) -> Result<()> {
        *self.local_sdp.lock() = Some(answer_sdp.to_string());
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<()> {
        self.candidates.lock().push(candidate);
        if self.behavior.fail_candidates {
            return Err(Error::IceCandidateError("rejected".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSink {
    pub written: AtomicUsize,
    /// Writes entered, including ones that never return
    pub entered: AtomicUsize,
    stall: bool,
}

#[async_trait]
impl PacketSink for FakeSink {
    async fn write_rtp(&self, _packet: &Packet) -> Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if self.stall {
            std::future::pending::<()>().await;
        }
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A minimal RTP datagram as a pipeline would send it
pub fn rtp_datagram(seq: u16) -> Bytes {
    Packet {
        header: Header {
            version: 2,
            payload_type: 96,
            sequence_number: seq,
            ssrc: 0x0bad_cafe,
            ..Default::default()
        },
        payload: Bytes::from_static(&[0x65, 0x88, 0x84, 0x00]),
    }
    .marshal()
    .unwrap()
}

/// A loopback UDP port that was free a moment ago
pub fn free_udp_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[derive(Default)]
pub struct FakeFactory {
    pub sessions: Mutex<Vec<Arc<FakeSession>>>,
    pub attempts: Mutex<Vec<IceConfig>>,
    pub behavior: Mutex<SessionBehavior>,
    /// Fail every config except the STUN-only fallback
    pub fail_primary: AtomicBool,
    pub fail_all: AtomicBool,
}

impl FakeFactory {
    pub fn session(&self, index: usize) -> Arc<FakeSession> {
        Arc::clone(&self.sessions.lock()[index])
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create(&self, config: &IceConfig) -> Result<Arc<dyn EngineSession>> {
        self.attempts.lock().push(config.clone());

        if self.fail_all.load(Ordering::SeqCst) {
            return Err(Error::PeerConnectionError("engine unavailable".to_string()));
        }
        if self.fail_primary.load(Ordering::SeqCst) && *config != IceConfig::stun_only() {
            return Err(Error::PeerConnectionError("turn unreachable".to_string()));
        }

        let mut sessions = self.sessions.lock();
        let session = Arc::new(FakeSession {
            id: sessions.len() + 1,
            config: config.clone(),
            behavior: self.behavior.lock().clone(),
            handler: Mutex::new(None),
            tracks: Mutex::new(Vec::new()),
            remote_sdp: Mutex::new(None),
            local_sdp: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            close_count: AtomicUsize::new(0),
        });
        sessions.push(Arc::clone(&session));
        Ok(session)
    }
}

pub struct FakeProcess {
    kind: MediaKind,
    stopped: bool,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl SupervisedProcess for FakeProcess {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn stop(&mut self, _grace: Duration) -> StopOutcome {
        if self.stopped {
            return StopOutcome::NotRunning;
        }
        self.stopped = true;
        self.stops.fetch_add(1, Ordering::SeqCst);
        StopOutcome::Exited
    }
}

/// Launch record: kind, description, stop counter
pub struct Launch {
    pub kind: MediaKind,
    pub description: String,
    pub stops: Arc<AtomicUsize>,
}

#[derive(Default)]
pub struct FakeLauncher {
    pub launches: Mutex<Vec<Launch>>,
    pub failing: Mutex<Vec<MediaKind>>,
}

impl FakeLauncher {
    pub fn launch_count(&self) -> usize {
        self.launches.lock().len()
    }

    /// Stop calls per launch, in launch order
    pub fn stop_counts(&self) -> Vec<usize> {
        self.launches
            .lock()
            .iter()
            .map(|l| l.stops.load(Ordering::SeqCst))
            .collect()
    }
}

impl PipelineLauncher for FakeLauncher {
    fn launch(&self, kind: MediaKind, description: &str) -> Option<Box<dyn SupervisedProcess>> {
        if self.failing.lock().contains(&kind) {
            return None;
        }

        let stops = Arc::new(AtomicUsize::new(0));
        self.launches.lock().push(Launch {
            kind,
            description: description.to_string(),
            stops: Arc::clone(&stops),
        });

        Some(Box::new(FakeProcess {
            kind,
            stopped: false,
            stops,
        }))
    }
}

pub struct FakeSignaling {
    inbox_tx: mpsc::UnboundedSender<ClientMessage>,
    inbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ClientMessage>>,
    pub sent: Mutex<Vec<ClientMessage>>,
    closed: CancellationToken,
}

impl Default for FakeSignaling {
    fn default() -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            inbox_tx,
            inbox_rx: tokio::sync::Mutex::new(inbox_rx),
            sent: Mutex::new(Vec::new()),
            closed: CancellationToken::new(),
        }
    }
}

impl FakeSignaling {
    /// Queue a message for the next `read`
    pub fn deliver(&self, message: ClientMessage) {
        let _ = self.inbox_tx.send(message);
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    pub fn answers_to(&self, to: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|m| m.to == to)
            .filter_map(|m| m.signal)
            .filter(|s| s.kind == "answer")
            .map(|s| s.sdp)
            .collect()
    }

    pub fn candidates_to(&self, to: &str) -> Vec<WebrtcSignal> {
        self.sent()
            .into_iter()
            .filter(|m| m.to == to)
            .filter_map(|m| m.signal)
            .filter(|s| s.kind.is_empty() && !s.candidate.is_empty())
            .collect()
    }
}

#[async_trait]
impl SignalingChannel for FakeSignaling {
    async fn read(&self) -> Result<ClientMessage> {
        let mut inbox = self.inbox_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(Error::SignalingError("connection closed".to_string())),
            next = inbox.recv() => next.ok_or_else(|| Error::SignalingError("stream ended".to_string())),
        }
    }

    async fn write(&self, message: &ClientMessage) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::SignalingError("channel closed".to_string()));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

/// Controller wired to fakes
pub struct Harness {
    pub controller: CallController,
    pub factory: Arc<FakeFactory>,
    pub launcher: Arc<FakeLauncher>,
    pub signaling: Arc<FakeSignaling>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: RelayConfig) -> Self {
        Self::build(config, FakeFactory::default(), FakeLauncher::default())
    }

    pub fn build(config: RelayConfig, factory: FakeFactory, launcher: FakeLauncher) -> Self {
        let factory = Arc::new(factory);
        let launcher = Arc::new(launcher);
        let signaling = Arc::new(FakeSignaling::default());
        let shutdown = CancellationToken::new();

        let controller = CallController::new(
            Arc::new(config),
            Arc::clone(&factory) as Arc<dyn SessionFactory>,
            Arc::clone(&launcher) as Arc<dyn PipelineLauncher>,
            Arc::clone(&signaling) as Arc<dyn SignalingChannel>,
            shutdown.clone(),
        );

        Self {
            controller,
            factory,
            launcher,
            signaling,
            shutdown,
        }
    }

    pub async fn deliver(&self, message: ClientMessage) {
        self.controller.handle_message(&message).await;
    }
}
