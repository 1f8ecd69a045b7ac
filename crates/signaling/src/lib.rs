//! Two-party WebRTC signaling and negotiation coordinator
//!
//! This crate connects to a WebSocket signaling server, discovers the other
//! party through `hello` greetings, negotiates a WebRTC peer link via
//! offer/answer and ICE candidate exchange, and reports link quality.
//!
//! # Features
//!
//! - **Signaling channel**: JSON over WebSocket with keepalive and reconnection
//! - **Negotiation**: initiator/responder roles, remote candidate buffering
//! - **Relay credentials**: TURN credentials fetched over HTTP, STUN fallback
//! - **Quality sampling**: periodic 0-100 score from link statistics
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Application                                         │
//! │  ↓ (CallEvent stream, LocalMediaSlot, terminate)     │
//! │  SignalingCoordinator                                │
//! │  ├─ ChannelManager (WebSocket, keepalive, reconnect) │
//! │  ├─ NegotiationEngine (single actor task)            │
//! │  │   └─ PeerSession (link, role, candidate buffer)   │
//! │  └─ QualitySampler (timer task, reads snapshots)     │
//! │     ↓                                                │
//! │  PeerLink (webrtc-rs RTCPeerConnection)              │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use peercall_signaling::SignalingConfig;
//!
//! let config = SignalingConfig::new("wss://calls.example.com/api/signal")
//!     .with_relay_credentials_url("https://calls.example.com/api/turn");
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.keepalive_interval_ms, 20_000);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use peercall_signaling::{
//!     CallEvent, LocalMedia, LocalTrack, SessionIdentity, SignalingConfig,
//!     SignalingCoordinator, StaticCredentials,
//! };
//!
//! # async fn example() -> peercall_signaling::Result<()> {
//! let credentials = Arc::new(StaticCredentials::new(SessionIdentity::new("token", "Alice")));
//! let config = SignalingConfig::new("wss://calls.example.com/api/signal");
//!
//! let (coordinator, mut events) = SignalingCoordinator::builder(config, credentials)
//!     .start()
//!     .await?;
//!
//! coordinator.local_media().provide(LocalMedia::new(vec![
//!     LocalTrack::opus("audio", "alice"),
//!     LocalTrack::vp8("video", "alice"),
//! ]));
//!
//! while let Some(event) = events.recv().await {
//!     if let CallEvent::Quality(report) = event {
//!         println!("quality {}", report.score);
//!     }
//! }
//! coordinator.terminate().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod ice;
pub mod identity;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod quality;
pub mod signaling;

// Re-exports for public API
pub use config::SignalingConfig;
pub use coordinator::{CoordinatorBuilder, SignalingCoordinator};
pub use error::{Error, Result};
pub use events::CallEvent;
pub use ice::{IceServer, IceServerSource, RelayCredentialClient, StaticIceServers};
pub use identity::{CredentialSupplier, SessionIdentity, StaticCredentials};
pub use media::{LocalMedia, LocalMediaSlot, LocalTrack, MediaKind, RemoteMedia};
pub use negotiation::{NegotiationRole, NegotiationState};
pub use peer::{PeerLink, PeerLinkFactory};
pub use quality::{QualityReport, QualitySample};
pub use signaling::{ChannelState, ReconnectPolicy};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
