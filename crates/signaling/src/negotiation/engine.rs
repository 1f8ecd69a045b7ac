//! Offer/answer/candidate state machine
//!
//! One [`PeerSession`] holds everything tied to a single peer link: the link,
//! the role, the negotiation phase, the remote party and the remote candidate
//! buffer. Tearing a link down drops the whole session; a new negotiation
//! starts from a fresh one.
//!
//! The engine is driven by a single task. webrtc-rs calls suspend that task,
//! so inbound messages queue up and are processed strictly in arrival order.
//! An offer that arrives before local media exists is parked in the session
//! instead: the engine keeps handling messages and commands, and the driver
//! calls [`NegotiationEngine::handle_local_media`] once the slot is filled.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::events::CallEvent;
use crate::ice::{IceServer, IceServerSource};
use crate::identity::SessionIdentity;
use crate::media::{LocalMedia, LocalMediaSlot};
use crate::negotiation::buffer::CandidateBuffer;
use crate::negotiation::state::{EngineSnapshot, NegotiationRole, NegotiationState};
use crate::peer::link::{LinkEvent, LinkEventKind, LinkEventSender, LinkState, PeerLink, PeerLinkFactory};
use crate::signaling::protocol::{IceCandidate, SessionDescription, WireMessage};
use crate::{Error, Result};

/// Outbound side of the signaling channel as seen by the engine
pub trait SignalSink: Send + Sync {
    /// Send a message; `false` if the channel is not open (the message is dropped)
    fn send(&self, message: WireMessage) -> bool;

    /// Tear the channel down for good
    fn close(&self);
}

/// Collaborators the engine needs
pub struct EngineDeps {
    /// Local identity; the display name tags outbound offers
    pub identity: SessionIdentity,
    /// Creates peer links
    pub link_factory: Arc<dyn PeerLinkFactory>,
    /// Resolves ICE servers on first link creation
    pub ice_source: Arc<dyn IceServerSource>,
    /// Outbound signaling
    pub signals: Arc<dyn SignalSink>,
    /// Local media provided by the application
    pub media: LocalMediaSlot,
    /// Application notifications
    pub events: mpsc::UnboundedSender<CallEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Negotiating,
    AwaitingLocalMedia,
    DescriptionSet,
}

/// State owned by one peer link lifetime
struct PeerSession {
    link: Arc<dyn PeerLink>,
    role: NegotiationRole,
    phase: Phase,
    remote_party: Option<String>,
    candidates: CandidateBuffer,
    /// Inbound offer held until local media is provided
    parked_offer: Option<SessionDescription>,
}

impl PeerSession {
    fn new(link: Arc<dyn PeerLink>, role: NegotiationRole, early: &mut CandidateBuffer) -> Self {
        let mut candidates = CandidateBuffer::new();
        candidates.append(early);
        Self {
            link,
            role,
            phase: Phase::Negotiating,
            remote_party: None,
            candidates,
            parked_offer: None,
        }
    }

    fn remote_description_set(&self) -> bool {
        self.phase == Phase::DescriptionSet
    }
}

/// Negotiation engine for a single coordinator
pub struct NegotiationEngine {
    identity: SessionIdentity,
    link_factory: Arc<dyn PeerLinkFactory>,
    ice_source: Arc<dyn IceServerSource>,
    ice_servers: Option<Vec<IceServer>>,
    signals: Arc<dyn SignalSink>,
    media: LocalMediaSlot,
    events: mpsc::UnboundedSender<CallEvent>,
    link_events: mpsc::UnboundedSender<LinkEvent>,
    snapshot: watch::Sender<EngineSnapshot>,
    session: Option<PeerSession>,
    early_candidates: CandidateBuffer,
    next_link_id: u64,
    closed: bool,
}

impl NegotiationEngine {
    /// Create an engine and the receiver its peer links report into
    pub fn new(deps: EngineDeps) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (link_events, link_events_rx) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(EngineSnapshot::default());

        let engine = Self {
            identity: deps.identity,
            link_factory: deps.link_factory,
            ice_source: deps.ice_source,
            ice_servers: None,
            signals: deps.signals,
            media: deps.media,
            events: deps.events,
            link_events,
            snapshot,
            session: None,
            early_candidates: CandidateBuffer::new(),
            next_link_id: 0,
            closed: false,
        };
        (engine, link_events_rx)
    }

    /// Current state
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch state changes from another task
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.subscribe()
    }

    /// Current peer link
    pub fn peer_link(&self) -> Option<Arc<dyn PeerLink>> {
        self.session.as_ref().map(|s| Arc::clone(&s.link))
    }

    /// Whether an inbound offer is parked waiting for local media
    pub fn awaiting_local_media(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.phase == Phase::AwaitingLocalMedia)
    }

    /// Dispatch one inbound wire message, logging anything that fails
    pub async fn handle_message(&mut self, message: WireMessage) {
        let kind = message.kind();
        let result = match message {
            WireMessage::Hello { from } => self.handle_hello(from).await,
            WireMessage::Offer { offer, from } => self.handle_offer(offer, from).await,
            WireMessage::Answer { answer } => self.handle_answer(answer).await,
            WireMessage::Candidate { candidate } => self.handle_candidate(candidate).await,
            WireMessage::EndCall => {
                info!("Remote party ended the call");
                self.drop_remote().await;
                Ok(())
            }
            WireMessage::Ping => Ok(()),
        };

        if let Err(e) = result {
            if e.is_protocol_violation() {
                warn!("Dropping {} message: {}", kind, e);
            } else if e.is_capability_failure() {
                warn!("Handling {} message failed, state unchanged: {}", kind, e);
            } else {
                debug!("{} message not handled: {}", kind, e);
            }
        }
    }

    /// A greeting arrived; start negotiating if no peer link exists
    pub async fn handle_hello(&mut self, from: Option<String>) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.session.is_some() {
            debug!(remote = ?from, "Ignoring hello, peer link already exists");
            return Ok(());
        }
        info!(remote = ?from, "Remote party present, initiating call");
        self.initiate(from).await
    }

    /// Become initiator: create the link, attach local media, send an offer
    ///
    /// On failure the link is discarded and the engine stays idle, keeping
    /// any remote candidates buffered for the next attempt.
    pub async fn initiate(&mut self, remote_party: Option<String>) -> Result<()> {
        self.ensure_open()?;
        if self.session.is_some() {
            return Err(Error::InvalidState(
                "initiate requires no existing peer link".to_string(),
            ));
        }

        let link = self.create_link().await?;
        let mut session =
            PeerSession::new(Arc::clone(&link), NegotiationRole::Initiator, &mut self.early_candidates);
        session.remote_party = remote_party;
        self.session = Some(session);
        self.publish();

        let result = self.send_offer(link).await;
        if result.is_err() {
            self.abandon_session().await;
        }
        result
    }

    async fn send_offer(&mut self, link: Arc<dyn PeerLink>) -> Result<()> {
        if let Some(media) = self.media.current() {
            attach_media(link.as_ref(), &media).await?;
        }

        let offer = link.create_offer().await?;
        link.set_local_description(offer.clone()).await?;

        let message = WireMessage::Offer {
            offer,
            from: Some(self.identity.display_name().to_string()),
        };
        if !self.signals.send(message) {
            warn!(link_id = link.id(), "Offer not sent, signaling channel is down");
        } else {
            debug!(link_id = link.id(), "Offer sent");
        }
        Ok(())
    }

    /// An offer arrived: answer it, creating the link if needed
    ///
    /// A freshly created link needs local media before the offer is applied;
    /// without it the offer is parked and [`CallEvent::LocalMediaRequested`]
    /// is emitted. An offer on an existing link (glare, or a renegotiation) is
    /// applied as received. If answering on a new link fails, the link is
    /// discarded and buffered candidates are kept for a retry.
    pub async fn handle_offer(
        &mut self,
        offer: SessionDescription,
        from: Option<String>,
    ) -> Result<()> {
        self.ensure_open()?;

        let Some(session) = self.session.as_mut() else {
            let link = self.create_link().await?;
            let mut session =
                PeerSession::new(link, NegotiationRole::Responder, &mut self.early_candidates);
            session.remote_party = from;
            self.session = Some(session);
            self.publish();

            return match self.media.current() {
                Some(media) => self.answer_on_new_link(offer, media).await,
                None => {
                    self.park_offer(offer);
                    Ok(())
                }
            };
        };

        if session.remote_party.is_none() {
            session.remote_party = from;
        }
        if session.phase == Phase::AwaitingLocalMedia {
            debug!(link_id = session.link.id(), "Replacing parked offer with a newer one");
            session.parked_offer = Some(offer);
            self.publish();
            return Ok(());
        }
        if session.role == NegotiationRole::Initiator {
            warn!(
                link_id = session.link.id(),
                "Glare: offer received while initiator, applying it on the existing link"
            );
        }
        let link = Arc::clone(&session.link);
        self.publish();
        self.apply_offer(link, offer).await
    }

    /// Local media became available; answer the parked offer, if any
    pub async fn handle_local_media(&mut self, media: LocalMedia) -> Result<()> {
        let parked = match self.session.as_mut() {
            Some(session) if session.phase == Phase::AwaitingLocalMedia => {
                session.parked_offer.take()
            }
            _ => None,
        };
        let Some(offer) = parked else {
            return Ok(());
        };

        info!("Local media ready, answering parked offer");
        self.set_phase(Phase::Negotiating);
        self.answer_on_new_link(offer, media).await
    }

    fn park_offer(&mut self, offer: SessionDescription) {
        if let Some(session) = self.session.as_mut() {
            session.parked_offer = Some(offer);
        }
        self.set_phase(Phase::AwaitingLocalMedia);
        let _ = self.events.send(CallEvent::LocalMediaRequested);
        info!("Inbound offer waiting for local media");
    }

    async fn answer_on_new_link(
        &mut self,
        offer: SessionDescription,
        media: LocalMedia,
    ) -> Result<()> {
        let link = self.current_link()?;
        let result = match attach_media(link.as_ref(), &media).await {
            Ok(()) => self.apply_offer(link, offer).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.abandon_session().await;
        }
        result
    }

    async fn apply_offer(
        &mut self,
        link: Arc<dyn PeerLink>,
        offer: SessionDescription,
    ) -> Result<()> {
        link.set_remote_description(offer).await?;
        self.mark_description_set();
        self.flush_candidates().await;

        let answer = link.create_answer().await?;
        link.set_local_description(answer.clone()).await?;
        if !self.signals.send(WireMessage::Answer { answer }) {
            warn!(link_id = link.id(), "Answer not sent, signaling channel is down");
        } else {
            debug!(link_id = link.id(), "Answer sent");
        }
        Ok(())
    }

    /// An answer arrived; valid only for the initiator awaiting one
    pub async fn handle_answer(&mut self, answer: SessionDescription) -> Result<()> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::ProtocolViolation("answer received without a peer link".to_string()))?;

        if session.role != NegotiationRole::Initiator {
            return Err(Error::ProtocolViolation(
                "answer received by the responder".to_string(),
            ));
        }
        if session.remote_description_set() {
            return Err(Error::ProtocolViolation("duplicate answer".to_string()));
        }

        let link = Arc::clone(&session.link);
        link.set_remote_description(answer).await?;
        self.mark_description_set();
        self.flush_candidates().await;
        Ok(())
    }

    /// A remote candidate arrived: apply it now or buffer it
    pub async fn handle_candidate(&mut self, candidate: Option<IceCandidate>) -> Result<()> {
        let Some(candidate) = candidate.filter(|c| !c.candidate.is_empty()) else {
            debug!("Ignoring candidate without payload");
            return Ok(());
        };
        if self.closed {
            return Ok(());
        }

        if let Some(session) = self.session.as_mut() {
            if session.remote_description_set() {
                let link = Arc::clone(&session.link);
                return link.add_ice_candidate(candidate).await;
            }
            session.candidates.push(candidate);
            debug!(buffered = session.candidates.len(), "Buffered remote candidate");
        } else {
            self.early_candidates.push(candidate);
            debug!(
                buffered = self.early_candidates.len(),
                "Buffered remote candidate before any peer link"
            );
        }
        self.publish();
        Ok(())
    }

    /// React to something the current peer link reported
    pub async fn handle_link_event(&mut self, event: LinkEvent) {
        let current = self.session.as_ref().map(|s| s.link.id());
        if current != Some(event.link_id) {
            debug!(link_id = event.link_id, "Ignoring event from a discarded peer link");
            return;
        }

        match event.kind {
            LinkEventKind::LocalCandidate(Some((candidate, info))) => {
                debug!(
                    typ = %info.typ,
                    protocol = %info.protocol,
                    address = %info.address,
                    "Local candidate gathered"
                );
                if !self.signals.send(WireMessage::Candidate {
                    candidate: Some(candidate),
                }) {
                    debug!("Local candidate dropped, signaling channel is down");
                }
            }
            LinkEventKind::LocalCandidate(None) => {
                debug!(link_id = event.link_id, "Local candidate gathering complete");
            }
            LinkEventKind::State(state) => {
                info!(link_id = event.link_id, "Peer link state: {:?}", state);
                if state == LinkState::Failed {
                    warn!(link_id = event.link_id, "Peer link failed, dropping remote party");
                    self.drop_remote().await;
                }
            }
            LinkEventKind::RemoteTrack(media) => {
                info!(kind = %media.kind, track_id = %media.track_id, "Remote track arrived");
                let _ = self.events.send(CallEvent::RemoteMedia(media));
            }
        }
    }

    /// Tear down the peer link only; the signaling channel stays up
    ///
    /// Idempotent.
    pub async fn drop_remote(&mut self) {
        self.early_candidates.clear();
        if self.session.is_none() {
            self.publish();
            return;
        }
        self.discard_session().await;
    }

    /// Hang up: tell the remote party, then release link, channel and local media
    ///
    /// Idempotent.
    pub async fn end_call(&mut self) {
        if self.closed {
            return;
        }

        if !self.signals.send(WireMessage::EndCall) {
            debug!("endCall not sent, signaling channel is down");
        }
        if self.session.is_some() {
            self.discard_session().await;
        }
        self.early_candidates.clear();
        self.media.release();
        self.signals.close();
        self.closed = true;
        self.publish();

        info!("Call ended");
        let _ = self.events.send(CallEvent::Terminated);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Cancelled("call already ended".to_string()));
        }
        Ok(())
    }

    fn current_link(&self) -> Result<Arc<dyn PeerLink>> {
        self.session
            .as_ref()
            .map(|s| Arc::clone(&s.link))
            .ok_or_else(|| Error::InvalidState("no peer link".to_string()))
    }

    async fn create_link(&mut self) -> Result<Arc<dyn PeerLink>> {
        let ice_servers = match &self.ice_servers {
            Some(servers) => servers.clone(),
            None => {
                let servers = self.ice_source.ice_servers(&self.identity).await;
                self.ice_servers = Some(servers.clone());
                servers
            }
        };

        self.next_link_id += 1;
        let events = LinkEventSender::new(self.next_link_id, self.link_events.clone());
        self.link_factory.create(&ice_servers, events).await
    }

    /// Discard a link whose negotiation failed, keeping unapplied candidates
    async fn abandon_session(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if !session.candidates.is_empty() {
                debug!(
                    count = session.candidates.len(),
                    "Keeping buffered candidates for the next peer link"
                );
            }
            let mut kept = std::mem::take(&mut session.candidates);
            kept.append(&mut self.early_candidates);
            self.early_candidates = kept;
        }
        self.discard_session().await;
    }

    async fn discard_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.link.close().await {
                warn!(link_id = session.link.id(), "Closing peer link failed: {}", e);
            }
        }
        self.publish();
    }

    fn set_phase(&mut self, phase: Phase) {
        if let Some(session) = self.session.as_mut() {
            session.phase = phase;
        }
        self.publish();
    }

    fn mark_description_set(&mut self) {
        self.set_phase(Phase::DescriptionSet);
    }

    /// Apply buffered candidates in arrival order
    async fn flush_candidates(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let link = Arc::clone(&session.link);
        let pending = session.candidates.drain();
        self.publish();

        if !pending.is_empty() {
            debug!(count = pending.len(), "Applying buffered remote candidates");
        }
        for candidate in pending {
            if let Err(e) = link.add_ice_candidate(candidate).await {
                warn!(link_id = link.id(), "Buffered candidate rejected: {}", e);
            }
        }
    }

    fn publish(&self) {
        let next = match self.session.as_ref() {
            Some(session) => EngineSnapshot {
                state: match session.phase {
                    Phase::Negotiating => NegotiationState::Negotiating,
                    Phase::AwaitingLocalMedia => NegotiationState::AwaitingLocalMedia,
                    Phase::DescriptionSet => NegotiationState::DescriptionSet,
                },
                role: session.role,
                remote_party: session.remote_party.clone(),
                link: Some(Arc::clone(&session.link)),
                buffered_candidates: session.candidates.len(),
            },
            None => EngineSnapshot {
                state: if self.closed {
                    NegotiationState::Closed
                } else {
                    NegotiationState::Idle
                },
                buffered_candidates: self.early_candidates.len(),
                ..Default::default()
            },
        };

        let previous = self.snapshot.send_replace(next.clone());
        if previous.remote_party != next.remote_party {
            let _ = self.events.send(CallEvent::RemoteParty(next.remote_party));
        }
    }
}

async fn attach_media(link: &dyn PeerLink, media: &LocalMedia) -> Result<()> {
    for track in media.tracks() {
        if !link.attach_track(track).await? {
            debug!(track_id = track.id(), "Local track already attached");
        }
    }
    Ok(())
}
