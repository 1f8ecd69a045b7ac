//! Peer link abstraction and its webrtc-rs implementation

pub mod connection;
pub mod link;

pub use connection::{RtcPeerLink, RtcPeerLinkFactory};
pub use link::{LinkEvent, LinkEventKind, LinkEventSender, LinkState, PeerLink, PeerLinkFactory};
