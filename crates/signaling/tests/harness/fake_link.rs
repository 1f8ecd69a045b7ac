//! Scriptable peer links
//!
//! A `FakePeerLink` produces canned descriptions, records every call made on
//! it and can be told to fail. Tests push link events through it the same way
//! the webrtc-rs callbacks would.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use peercall_signaling::ice::IceServer;
use peercall_signaling::media::LocalTrack;
use peercall_signaling::peer::link::{LinkEventKind, LinkEventSender, PeerLink, PeerLinkFactory};
use peercall_signaling::quality::{InboundVideo, QualitySample};
use peercall_signaling::signaling::{IceCandidate, SessionDescription};
use peercall_signaling::{Error, Result};

/// Everything the engine did to one link
#[derive(Debug, Clone, Default)]
pub struct LinkLog {
    pub local_descriptions: Vec<SessionDescription>,
    pub remote_descriptions: Vec<SessionDescription>,
    /// Candidate lines, in the order they were applied
    pub applied_candidates: Vec<String>,
    pub attached_tracks: Vec<String>,
    pub replaced_tracks: Vec<String>,
    pub close_calls: u32,
}

pub struct FakePeerLink {
    id: u64,
    events: LinkEventSender,
    log: Mutex<LinkLog>,
    fail_remote_description: AtomicBool,
}

impl FakePeerLink {
    fn new(events: LinkEventSender, reject_remote: bool) -> Self {
        Self {
            id: events.link_id(),
            events,
            log: Mutex::new(LinkLog::default()),
            fail_remote_description: AtomicBool::new(reject_remote),
        }
    }

    pub fn log(&self) -> LinkLog {
        self.log.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().close_calls > 0
    }

    /// Make every following `set_remote_description` fail
    pub fn fail_remote_description(&self) {
        self.fail_remote_description.store(true, Ordering::SeqCst);
    }

    /// Report an event as if the underlying transport produced it
    pub fn emit(&self, kind: LinkEventKind) {
        self.events.emit(kind);
    }
}

#[async_trait]
impl PeerLink for FakePeerLink {
    fn id(&self) -> u64 {
        self.id
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(format!("v=0 fake-offer link={}", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.log.lock().remote_descriptions.is_empty() {
            return Err(Error::SdpError("no remote offer".to_string()));
        }
        Ok(SessionDescription::answer(format!("v=0 fake-answer link={}", self.id)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.log.lock().local_descriptions.push(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if self.fail_remote_description.load(Ordering::SeqCst) {
            return Err(Error::SdpError("remote description rejected".to_string()));
        }
        self.log.lock().remote_descriptions.push(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut log = self.log.lock();
        if log.remote_descriptions.is_empty() {
            return Err(Error::IceCandidateError(
                "candidate applied before remote description".to_string(),
            ));
        }
        log.applied_candidates.push(candidate.candidate);
        Ok(())
    }

    async fn attach_track(&self, track: &LocalTrack) -> Result<bool> {
        let mut log = self.log.lock();
        if log.attached_tracks.iter().any(|id| id == track.id()) {
            return Ok(false);
        }
        log.attached_tracks.push(track.id().to_string());
        Ok(true)
    }

    async fn replace_track(&self, track: &LocalTrack) -> Result<()> {
        self.log.lock().replaced_tracks.push(track.id().to_string());
        Ok(())
    }

    async fn stats(&self) -> Result<QualitySample> {
        Ok(QualitySample {
            inbound_video: InboundVideo {
                packets_received: Some(100),
                packets_lost: Some(10),
                frames_per_second: Some(10.0),
            },
            round_trip_time: Some(0.2),
            bytes_received: Some(0),
            ..Default::default()
        })
    }

    async fn close(&self) -> Result<()> {
        self.log.lock().close_calls += 1;
        Ok(())
    }
}

/// Factory handing out `FakePeerLink`s and remembering them
#[derive(Default)]
pub struct FakeLinkFactory {
    links: Mutex<Vec<Arc<FakePeerLink>>>,
    ice_servers: Mutex<Vec<Vec<IceServer>>>,
    fail_next: AtomicU32,
    reject_remote: AtomicBool,
}

impl FakeLinkFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every link created so far, oldest first
    pub fn links(&self) -> Vec<Arc<FakePeerLink>> {
        self.links.lock().clone()
    }

    pub fn latest(&self) -> Option<Arc<FakePeerLink>> {
        self.links.lock().last().cloned()
    }

    /// ICE server lists passed to each create call
    pub fn ice_servers(&self) -> Vec<Vec<IceServer>> {
        self.ice_servers.lock().clone()
    }

    /// Links created from now on reject remote descriptions
    pub fn reject_remote_descriptions(&self) {
        self.reject_remote.store(true, Ordering::SeqCst);
    }

    /// Links created from now on accept remote descriptions again
    pub fn accept_remote_descriptions(&self) {
        self.reject_remote.store(false, Ordering::SeqCst);
    }

    /// Fail the next `count` create calls
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerLinkFactory for FakeLinkFactory {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: LinkEventSender,
    ) -> Result<Arc<dyn PeerLink>> {
        self.ice_servers.lock().push(ice_servers.to_vec());
        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::PeerConnectionError("link creation failed".to_string()));
        }

        let link = Arc::new(FakePeerLink::new(
            events,
            self.reject_remote.load(Ordering::SeqCst),
        ));
        self.links.lock().push(Arc::clone(&link));
        Ok(link)
    }
}
