//! PeerCall command-line client
//!
//! Joins a two-party call through a signaling server, offering placeholder
//! Opus and VP8 tracks, and logs call events until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Join with a session token
//! cargo run --bin peercall -- \
//!   --signaling-url wss://calls.example.com/api/signal \
//!   --token "$PEERCALL_TOKEN" \
//!   --name Alice
//!
//! # Fetch relay credentials and use exponential reconnect backoff
//! cargo run --bin peercall -- \
//!   --relay-url https://calls.example.com/api/turn \
//!   --hardened --max-reconnect-attempts 5
//! ```

use anyhow::Context;
use clap::Parser;
use peercall_signaling::{
    CallEvent, LocalMedia, LocalTrack, SessionIdentity, SignalingConfig, SignalingCoordinator,
    StaticCredentials,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// PeerCall client
///
/// Two-party WebRTC call over a WebSocket signaling server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket signaling URL
    #[arg(
        long,
        default_value = "ws://localhost:8080/api/signal",
        env = "PEERCALL_SIGNALING_URL"
    )]
    signaling_url: String,

    /// Session token presented to the signaling server
    #[arg(long, env = "PEERCALL_TOKEN")]
    token: String,

    /// Display name announced to the other party
    #[arg(long, default_value = "peercall", env = "PEERCALL_NAME")]
    name: String,

    /// Relay credentials endpoint (falls back to public STUN when unset)
    #[arg(long, env = "PEERCALL_RELAY_URL")]
    relay_url: Option<String>,

    /// Keepalive interval in milliseconds
    #[arg(long, default_value_t = 20_000, env = "PEERCALL_KEEPALIVE_MS")]
    keepalive_ms: u64,

    /// Quality sampling interval in milliseconds
    #[arg(long, default_value_t = 3_000, env = "PEERCALL_QUALITY_MS")]
    quality_ms: u64,

    /// Use jittered exponential reconnect backoff instead of a fixed delay
    #[arg(long, default_value_t = false, env = "PEERCALL_HARDENED")]
    hardened: bool,

    /// Give up after this many consecutive failed reconnects
    #[arg(long, env = "PEERCALL_MAX_RECONNECT_ATTEMPTS")]
    max_reconnect_attempts: Option<u32>,
}

fn build_config_from_args(args: &Args) -> SignalingConfig {
    let mut config = if args.hardened {
        SignalingConfig::hardened_preset(&args.signaling_url)
    } else {
        SignalingConfig::new(args.signaling_url.clone())
    };
    config = config.with_intervals(args.keepalive_ms, args.quality_ms);
    if let Some(url) = &args.relay_url {
        config = config.with_relay_credentials_url(url.clone());
    }
    if args.max_reconnect_attempts.is_some() {
        config.reconnect.max_attempts = args.max_reconnect_attempts;
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        signaling_url = %args.signaling_url,
        name = %args.name,
        "PeerCall client starting"
    );

    let config = build_config_from_args(&args);
    let credentials = Arc::new(StaticCredentials::new(SessionIdentity::new(
        args.token.clone(),
        args.name.clone(),
    )));

    let (coordinator, mut events) = SignalingCoordinator::builder(config, credentials)
        .start()
        .await
        .context("failed to start signaling coordinator")?;

    coordinator.local_media().provide(LocalMedia::new(vec![
        LocalTrack::opus("audio", args.name.clone()),
        LocalTrack::vp8("video", args.name.clone()),
    ]));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(CallEvent::RemoteParty(Some(name))) => info!(remote = %name, "In call"),
                Some(CallEvent::RemoteParty(None)) => info!("Remote party left"),
                Some(CallEvent::RemoteMedia(media)) => {
                    info!(kind = %media.kind, track_id = %media.track_id, "Receiving remote media")
                }
                Some(CallEvent::LocalMediaRequested) => info!("Waiting for local media"),
                Some(CallEvent::Quality(report)) => info!(
                    score = report.score,
                    bitrate_kbps = ?report.sample.bitrate_kbps,
                    "Link quality"
                ),
                Some(CallEvent::ChannelState(state)) => info!("Signaling channel {:?}", state),
                Some(CallEvent::Terminated) | None => break,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for ctrl-c: {}", e);
                }
                info!("Shutting down");
                coordinator.terminate().await;
                break;
            }
        }
    }

    info!("PeerCall client stopped");
    Ok(())
}

fn init_tracing() {
    // RUST_LOG overrides the default level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
