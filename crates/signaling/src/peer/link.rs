//! Peer link abstraction
//!
//! The negotiation engine drives a [`PeerLink`] and never touches webrtc-rs
//! directly. Links report asynchronous happenings (local candidates,
//! connectivity changes, remote tracks) as [`LinkEvent`]s tagged with the
//! link id, so events from a torn-down link can be recognized and ignored.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::ice::IceServer;
use crate::media::{LocalTrack, RemoteMedia};
use crate::quality::QualitySample;
use crate::signaling::protocol::{IceCandidate, SessionDescription};
use crate::Result;

/// Link-level connectivity state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, nothing negotiated yet
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Temporarily lost connectivity, may recover on its own
    Disconnected,
    /// Connectivity failed for good
    Failed,
    /// Closed locally
    Closed,
}

/// Diagnostic details of a gathered local candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateInfo {
    /// host, srflx, prflx or relay
    pub typ: String,
    /// udp or tcp
    pub protocol: String,
    /// Candidate address
    pub address: String,
}

/// Asynchronous happening on a peer link
#[derive(Debug, Clone)]
pub enum LinkEventKind {
    /// Local candidate gathered; `None` marks end of gathering
    LocalCandidate(Option<(IceCandidate, CandidateInfo)>),
    /// Connectivity state changed
    State(LinkState),
    /// Remote track arrived
    RemoteTrack(RemoteMedia),
}

/// Link event tagged with the id of the link that produced it
#[derive(Debug, Clone)]
pub struct LinkEvent {
    /// Id assigned when the link was created
    pub link_id: u64,
    /// What happened
    pub kind: LinkEventKind,
}

/// Sender handed to a link at creation, stamping events with its id
#[derive(Debug, Clone)]
pub struct LinkEventSender {
    link_id: u64,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkEventSender {
    /// Create a sender for link `link_id`
    pub fn new(link_id: u64, tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { link_id, tx }
    }

    /// Id of the link this sender belongs to
    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Emit an event; silently dropped once the coordinator is gone
    pub fn emit(&self, kind: LinkEventKind) {
        let _ = self.tx.send(LinkEvent {
            link_id: self.link_id,
            kind,
        });
    }
}

/// One negotiated media connection to the remote party
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Id assigned by the engine at creation
    fn id(&self) -> u64;

    /// Produce an offer (not yet applied)
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Produce an answer to the applied remote offer (not yet applied)
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote description
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote candidate; requires the remote description to be set
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Attach a local track; returns `false` if a track with the same id is already attached
    async fn attach_track(&self, track: &LocalTrack) -> Result<bool>;

    /// Replace the sending track of the same kind (camera switch, etc.)
    async fn replace_track(&self, track: &LocalTrack) -> Result<()>;

    /// Pull transport statistics
    async fn stats(&self) -> Result<QualitySample>;

    /// Close the link; idempotent
    async fn close(&self) -> Result<()>;
}

/// Creates peer links
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    /// Create a link using `ice_servers`, reporting events through `events`
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: LinkEventSender,
    ) -> Result<Arc<dyn PeerLink>>;
}
