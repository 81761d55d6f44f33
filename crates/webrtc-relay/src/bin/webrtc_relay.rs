//! WebRTC relay binary entry point
//!
//! Connects to a WebSocket signaling server and answers offers from browser
//! peers with locally captured video and audio.
//!
//! # Usage
//!
//! ```bash
//! SIGNAL_WS_URL=wss://signal.example.com/ws \
//! RTC_CONFIG_URL=https://signal.example.com/rtc-config \
//!   cargo run --bin webrtc_relay
//!
//! # Test pattern instead of the camera, no audio
//! cargo run --bin webrtc_relay -- \
//!   --signaling-url ws://localhost:8080/ws \
//!   --video-pipeline "videotestsrc ! x264enc tune=zerolatency ! rtph264pay pt=96 ! udpsink host=127.0.0.1 port=5004" \
//!   --disable-audio
//! ```

use clap::Parser;
use remotemedia_webrtc_relay::{
    CallController, GstLauncher, IceConfig, MediaConfig, RelayConfig, SignalingChannel,
    WebRtcSessionFactory, WebSocketSignaling,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Upper bound on the shutdown sequence after a signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Single-peer WebRTC media relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket signaling server URL
    #[arg(long, env = "SIGNAL_WS_URL")]
    signaling_url: String,

    /// Origin header sent to the signaling server
    #[arg(long, env = "SIGNAL_ORIGIN")]
    signaling_origin: Option<String>,

    /// Endpoint serving the ICE server list as JSON
    #[arg(long, env = "RTC_CONFIG_URL")]
    rtc_config_url: Option<String>,

    /// STUN servers used when no RTC config endpoint is usable (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302"
    )]
    stun_servers: Vec<String>,

    /// UDP port the video pipeline sends RTP to
    #[arg(long, default_value_t = 5004, env = "VIDEO_PORT")]
    video_port: u16,

    /// UDP port the audio pipeline sends RTP to
    #[arg(long, default_value_t = 5006, env = "AUDIO_PORT")]
    audio_port: u16,

    /// Video pipeline description (replaces the camera default)
    #[arg(long, env = "GST_VIDEO_PIPELINE")]
    video_pipeline: Option<String>,

    /// Audio pipeline description (replaces the microphone default)
    #[arg(long, env = "GST_AUDIO_PIPELINE")]
    audio_pipeline: Option<String>,

    /// Relay video only; any value but an empty one, 0, false, no or off enables it
    #[arg(
        long,
        env = "DISABLE_AUDIO",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    disable_audio: bool,

    /// Program that runs pipeline descriptions
    #[arg(long, default_value = "gst-launch-1.0", env = "GST_LAUNCH")]
    pipeline_program: String,
}

impl Args {
    fn into_config(self, ice: IceConfig) -> RelayConfig {
        RelayConfig {
            signaling_url: self.signaling_url,
            signaling_origin: self.signaling_origin.filter(|o| !o.trim().is_empty()),
            ice,
            media: MediaConfig {
                pipeline_program: self.pipeline_program,
                video_pipeline: self.video_pipeline,
                audio_pipeline: self.audio_pipeline,
                audio_disabled: self.disable_audio,
                video_port: self.video_port,
                audio_port: self.audio_port,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("webrtc-relay-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        signaling_url = %args.signaling_url,
        "WebRTC relay starting"
    );

    let ice = resolve_ice_config(args.rtc_config_url.as_deref(), &args.stun_servers).await;
    let config = args.into_config(ice);
    config.validate()?;
    let config = Arc::new(config);

    info!(
        ice_servers = config.ice.ice_servers.len(),
        video_port = config.media.video_port,
        audio_port = config.media.audio_port,
        audio_disabled = config.media.audio_disabled,
        "Relay configuration loaded"
    );

    let signaling = Arc::new(
        WebSocketSignaling::connect(&config.signaling_url, config.signaling_origin.as_deref())
            .await?,
    );

    let shutdown = CancellationToken::new();
    let controller = CallController::new(
        Arc::clone(&config),
        Arc::new(WebRtcSessionFactory::new()),
        Arc::new(GstLauncher::from_config(&config.media)),
        Arc::clone(&signaling) as Arc<dyn SignalingChannel>,
        shutdown.clone(),
    );

    let mut dispatch = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };

    let dispatch_done = tokio::select! {
        _ = wait_for_signal() => {
            info!("Shutdown signal received");
            false
        }
        result = &mut dispatch => {
            match result {
                Ok(Ok(())) => info!("Dispatch loop finished"),
                Ok(Err(e)) => warn!("Dispatch loop ended: {}", e),
                Err(e) => error!("Dispatch task failed: {}", e),
            }
            true
        }
    };

    shutdown.cancel();

    let graceful = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        controller.teardown().await;
        signaling.close().await;
        if !dispatch_done {
            let _ = dispatch.await;
        }
    })
    .await;

    if graceful.is_err() {
        warn!("Graceful shutdown timeout ({:?}), exiting", SHUTDOWN_TIMEOUT);
    }

    info!("WebRTC relay stopped");
    Ok(())
}

/// ICE configuration from the RTC config endpoint, or the STUN list
async fn resolve_ice_config(url: Option<&str>, stun_servers: &[String]) -> IceConfig {
    let fallback = || {
        if stun_servers.is_empty() {
            IceConfig::stun_only()
        } else {
            IceConfig::from_stun_servers(stun_servers)
        }
    };

    let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
        return fallback();
    };

    match IceConfig::fetch(url).await {
        Ok(config) if !config.ice_servers.is_empty() => {
            info!(ice_servers = config.ice_servers.len(), "Fetched RTC config");
            config
        }
        Ok(_) => {
            warn!("RTC config has no ICE servers, using STUN fallback");
            fallback()
        }
        Err(e) => {
            warn!("Failed to fetch RTC config, using STUN fallback: {}", e);
            fallback()
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing() {
    // RUST_LOG wins; info otherwise
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
