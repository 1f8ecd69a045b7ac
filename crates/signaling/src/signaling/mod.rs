//! Signaling channel: wire protocol, connection management and reconnection

pub mod channel;
pub mod protocol;
pub mod reconnect;

pub use channel::{ChannelManager, ChannelState};
pub use protocol::{IceCandidate, SdpKind, SessionDescription, WireMessage};
pub use reconnect::ReconnectPolicy;
