//! webrtc-rs peer link

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

use crate::ice::IceServer;
use crate::media::{LocalTrack, MediaKind, RemoteMedia};
use crate::peer::link::{
    CandidateInfo, LinkEventKind, LinkEventSender, LinkState, PeerLink, PeerLinkFactory,
};
use crate::quality::QualitySample;
use crate::signaling::protocol::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};

/// Peer link backed by a webrtc-rs `RTCPeerConnection`
pub struct RtcPeerLink {
    /// Id assigned by the negotiation engine
    id: u64,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,
}

impl RtcPeerLink {
    /// Create a new peer link
    ///
    /// # Arguments
    ///
    /// * `ice_servers` - Relay/reflection endpoints
    /// * `candidate_pool_size` - Candidates to pre-gather before the first offer
    /// * `events` - Where candidates, state changes and remote tracks are reported
    #[instrument(skip(ice_servers, events), fields(link_id = events.link_id()))]
    pub async fn new(
        ice_servers: &[IceServer],
        candidate_pool_size: u8,
        events: LinkEventSender,
    ) -> Result<Self> {
        info!("Creating peer link with {} ICE server entries", ice_servers.len());

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = ice_servers
            .iter()
            .map(|server| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                }
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ice_transport_policy: RTCIceTransportPolicy::All,
            ice_candidate_pool_size: candidate_pool_size,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
            })?);

        let id = events.link_id();
        Self::install_handlers(&peer_connection, events);

        Ok(Self {
            id,
            peer_connection,
        })
    }

    fn install_handlers(peer_connection: &Arc<RTCPeerConnection>, events: LinkEventSender) {
        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    events.emit(LinkEventKind::LocalCandidate(None));
                    return;
                };

                let info = CandidateInfo {
                    typ: candidate.typ.to_string(),
                    protocol: candidate.protocol.to_string(),
                    address: candidate.address.clone(),
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        };
                        events.emit(LinkEventKind::LocalCandidate(Some((candidate, info))));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let state_events = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let events = state_events.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => LinkState::New,
                        RTCPeerConnectionState::Connecting => LinkState::Connecting,
                        RTCPeerConnectionState::Connected => LinkState::Connected,
                        RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
                        RTCPeerConnectionState::Failed => LinkState::Failed,
                        RTCPeerConnectionState::Closed => LinkState::Closed,
                        _ => return,
                    };
                    events.emit(LinkEventKind::State(state));
                })
            },
        ));

        let link_id = events.link_id();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                debug!(link_id, "ICE connection state: {}", s);
                Box::pin(async {})
            },
        ));

        let track_events = events;
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                Box::pin(async move {
                    let Some(kind) = MediaKind::from_codec_type(track.kind()) else {
                        warn!("Ignoring remote track of unspecified kind");
                        return;
                    };
                    events.emit(LinkEventKind::RemoteTrack(RemoteMedia {
                        kind,
                        track_id: track.id(),
                        stream_id: track.stream_id(),
                        track: Some(track),
                    }));
                })
            },
        ));
    }

    /// Get the underlying WebRTC peer connection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpKind::Rollback => {
            return Err(Error::SdpError("Rollback descriptions are not supported".to_string()))
        }
    };
    parsed.map_err(|e| Error::SdpError(format!("Failed to parse description: {}", e)))
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    fn id(&self) -> u64 {
        self.id
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn attach_track(&self, track: &LocalTrack) -> Result<bool> {
        for sender in self.peer_connection.get_senders().await {
            if let Some(existing) = sender.track().await {
                if existing.id() == track.id() {
                    return Ok(false);
                }
            }
        }

        self.peer_connection
            .add_track(Arc::clone(track.track()))
            .await
            .map_err(|e| {
                Error::MediaTrackError(format!("Failed to add {} track: {}", track.kind(), e))
            })?;
        debug!(link_id = self.id, track_id = track.id(), "Attached local {} track", track.kind());
        Ok(true)
    }

    async fn replace_track(&self, track: &LocalTrack) -> Result<()> {
        for sender in self.peer_connection.get_senders().await {
            let same_kind = match sender.track().await {
                Some(existing) => MediaKind::from_codec_type(existing.kind()) == Some(track.kind()),
                None => false,
            };
            if same_kind {
                return sender
                    .replace_track(Some(Arc::clone(track.track())))
                    .await
                    .map_err(|e| {
                        Error::MediaTrackError(format!("Failed to replace track: {}", e))
                    });
            }
        }

        // Nothing of this kind is being sent yet
        self.attach_track(track).await.map(|_| ())
    }

    async fn stats(&self) -> Result<QualitySample> {
        let report = self.peer_connection.get_stats().await;
        let mut sample = QualitySample::default();

        for stat in report.reports.values() {
            match stat {
                StatsReportType::InboundRTP(inbound) if inbound.kind == "video" => {
                    sample.inbound_video.packets_received = Some(inbound.packets_received);
                }
                StatsReportType::OutboundRTP(outbound) if outbound.kind == "video" => {
                    sample.outbound_video.packets_sent = Some(outbound.packets_sent);
                }
                StatsReportType::RemoteInboundRTP(remote) if remote.kind == "video" => {
                    sample.outbound_video.remote_packets_lost = Some(remote.packets_lost.max(0) as u64);
                    if sample.round_trip_time.is_none() {
                        sample.round_trip_time = remote.round_trip_time;
                    }
                }
                StatsReportType::CandidatePair(pair) if pair.nominated => {
                    sample.round_trip_time = Some(pair.current_round_trip_time);
                    sample.bytes_received = Some(pair.bytes_received as u64);
                }
                _ => {}
            }
        }

        Ok(sample)
    }

    async fn close(&self) -> Result<()> {
        info!(link_id = self.id, "Closing peer link");
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close connection: {}", e)))
    }
}

/// Creates [`RtcPeerLink`]s
#[derive(Debug, Clone)]
pub struct RtcPeerLinkFactory {
    candidate_pool_size: u8,
}

impl RtcPeerLinkFactory {
    /// Factory whose links pre-gather `candidate_pool_size` candidates
    pub fn new(candidate_pool_size: u8) -> Self {
        Self {
            candidate_pool_size,
        }
    }
}

#[async_trait]
impl PeerLinkFactory for RtcPeerLinkFactory {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: LinkEventSender,
    ) -> Result<Arc<dyn PeerLink>> {
        let link = RtcPeerLink::new(ice_servers, self.candidate_pool_size, events).await?;
        Ok(Arc::new(link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn new_link(id: u64) -> (RtcPeerLink, mpsc::UnboundedReceiver<crate::peer::link::LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = RtcPeerLink::new(&[], 0, LinkEventSender::new(id, tx))
            .await
            .unwrap();
        (link, rx)
    }

    #[tokio::test]
    async fn test_link_creation() {
        let (link, _rx) = new_link(3).await;
        assert_eq!(link.id(), 3);
    }

    #[tokio::test]
    async fn test_create_offer_with_tracks() {
        let (link, _rx) = new_link(1).await;
        assert!(link.attach_track(&LocalTrack::opus("mic", "local")).await.unwrap());
        assert!(link.attach_track(&LocalTrack::vp8("cam", "local")).await.unwrap());

        let offer = link.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));
        link.set_local_description(offer).await.unwrap();
    }

    #[tokio::test]
    async fn test_attach_same_track_twice() {
        let (link, _rx) = new_link(1).await;
        let track = LocalTrack::opus("mic", "local");
        assert!(link.attach_track(&track).await.unwrap());
        assert!(!link.attach_track(&track).await.unwrap());
    }

    #[tokio::test]
    async fn test_offer_answer_between_links() {
        let (caller, _rx1) = new_link(1).await;
        let (callee, _rx2) = new_link(2).await;
        caller.attach_track(&LocalTrack::opus("mic", "a")).await.unwrap();

        let offer = caller.create_offer().await.unwrap();
        caller.set_local_description(offer.clone()).await.unwrap();
        callee.set_remote_description(offer).await.unwrap();

        let answer = callee.create_answer().await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        callee.set_local_description(answer.clone()).await.unwrap();
        caller.set_remote_description(answer).await.unwrap();

        caller.close().await.unwrap();
        callee.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_rejected() {
        let (link, _rx) = new_link(1).await;
        let rollback = SessionDescription {
            kind: SdpKind::Rollback,
            sdp: String::new(),
        };
        assert!(matches!(
            link.set_remote_description(rollback).await,
            Err(Error::SdpError(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_before_connect() {
        let (link, _rx) = new_link(1).await;
        let sample = link.stats().await.unwrap();
        assert!(sample.inbound_video.packets_received.is_none());
        assert_eq!(sample.score(), 100);
    }

    #[tokio::test]
    async fn test_close_twice() {
        let (link, _rx) = new_link(1).await;
        link.close().await.unwrap();
        link.close().await.unwrap();
    }
}
