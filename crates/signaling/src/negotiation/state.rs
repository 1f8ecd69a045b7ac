//! Negotiation role and state

use std::sync::Arc;

use crate::peer::link::PeerLink;

/// Which side of the offer/answer exchange this coordinator plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationRole {
    /// No peer link yet
    #[default]
    Unassigned,
    /// Sent the offer after a greeting from the remote party
    Initiator,
    /// Received an offer before sending one
    Responder,
}

/// Negotiation state of the current peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    /// No peer link
    #[default]
    Idle,
    /// Offer/answer exchange in progress
    Negotiating,
    /// Inbound offer parked until the application provides local media
    AwaitingLocalMedia,
    /// Remote description applied; connectivity proceeds on its own
    DescriptionSet,
    /// Call ended; the engine accepts nothing further
    Closed,
}

/// Point-in-time view of the engine, readable outside the actor
#[derive(Clone, Default)]
pub struct EngineSnapshot {
    /// Negotiation state
    pub state: NegotiationState,
    /// Role on the current peer link
    pub role: NegotiationRole,
    /// Display name of the remote party; only set while a peer link exists
    pub remote_party: Option<String>,
    /// Current peer link
    pub link: Option<Arc<dyn PeerLink>>,
    /// Remote candidates waiting for the remote description
    pub buffered_candidates: usize,
}

impl std::fmt::Debug for EngineSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSnapshot")
            .field("state", &self.state)
            .field("role", &self.role)
            .field("remote_party", &self.remote_party)
            .field("link_id", &self.link.as_ref().map(|link| link.id()))
            .field("buffered_candidates", &self.buffered_candidates)
            .finish()
    }
}
