//! Local and remote media handles
//!
//! The coordinator never captures or renders media. The application drops
//! ready-made tracks into a [`LocalMediaSlot`]; the negotiation engine attaches
//! whatever it finds there and waits on the slot when an inbound offer arrives
//! before local media exists.

use std::sync::Arc;
use tokio::sync::watch;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl MediaKind {
    /// Map a webrtc-rs codec type; `Unspecified` has no kind
    pub fn from_codec_type(codec_type: RTPCodecType) -> Option<Self> {
        match codec_type {
            RTPCodecType::Audio => Some(MediaKind::Audio),
            RTPCodecType::Video => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// A local track supplied by the application
#[derive(Clone)]
pub struct LocalTrack {
    kind: MediaKind,
    track: Arc<dyn TrackLocal + Send + Sync>,
}

impl LocalTrack {
    /// Wrap an existing webrtc-rs track
    pub fn new(kind: MediaKind, track: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        Self { kind, track }
    }

    /// Opus track that the application writes samples into
    pub fn opus(track_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            track_id.into(),
            stream_id.into(),
        ));
        Self::new(MediaKind::Audio, track)
    }

    /// VP8 track that the application writes samples into
    pub fn vp8(track_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            track_id.into(),
            stream_id.into(),
        ));
        Self::new(MediaKind::Video, track)
    }

    /// Track id, unique within the local media set
    pub fn id(&self) -> &str {
        self.track.id()
    }

    /// Track kind
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Underlying webrtc-rs track
    pub fn track(&self) -> &Arc<dyn TrackLocal + Send + Sync> {
        &self.track
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id())
            .field("kind", &self.kind)
            .finish()
    }
}

/// Set of local tracks offered to the peer
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    tracks: Vec<LocalTrack>,
}

impl LocalMedia {
    /// Create from a list of tracks
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self { tracks }
    }

    /// Tracks in attach order
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// No tracks (receive-only participant)
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// A track received from the remote party
#[derive(Clone)]
pub struct RemoteMedia {
    /// Media kind
    pub kind: MediaKind,
    /// Remote track id
    pub track_id: String,
    /// Remote stream id
    pub stream_id: String,
    /// RTP source; `None` for links that do not carry RTP
    pub track: Option<Arc<TrackRemote>>,
}

impl std::fmt::Debug for RemoteMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMedia")
            .field("kind", &self.kind)
            .field("track_id", &self.track_id)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

/// Shared slot holding the current local media
///
/// Cloning the slot yields another handle to the same media.
#[derive(Clone)]
pub struct LocalMediaSlot {
    tx: Arc<watch::Sender<Option<LocalMedia>>>,
}

impl Default for LocalMediaSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalMediaSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Supply local media, replacing whatever was there
    pub fn provide(&self, media: LocalMedia) {
        self.tx.send_replace(Some(media));
    }

    /// Withdraw local media, returning what was held
    pub fn release(&self) -> Option<LocalMedia> {
        self.tx.send_replace(None)
    }

    /// Current local media, if any
    pub fn current(&self) -> Option<LocalMedia> {
        self.tx.borrow().clone()
    }

    /// Wait until local media is available
    pub async fn ready(&self) -> crate::Result<LocalMedia> {
        let mut rx = self.tx.subscribe();
        let media = rx
            .wait_for(|media| media.is_some())
            .await
            .map_err(|_| crate::Error::Cancelled("local media slot dropped".to_string()))?;
        media
            .clone()
            .ok_or_else(|| crate::Error::Cancelled("local media withdrawn".to_string()))
    }
}

impl std::fmt::Debug for LocalMediaSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMediaSlot")
            .field("ready", &self.tx.borrow().is_some())
            .finish()
    }
}
