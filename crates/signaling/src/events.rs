//! Notifications delivered to the application

use crate::media::RemoteMedia;
use crate::quality::QualityReport;
use crate::signaling::channel::ChannelState;

/// Something the application may want to react to
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Remote party identified (`Some`) or gone (`None`)
    RemoteParty(Option<String>),
    /// A remote track arrived
    RemoteMedia(RemoteMedia),
    /// An inbound offer is waiting for local media in the local media slot
    LocalMediaRequested,
    /// Periodic link quality score
    Quality(QualityReport),
    /// Signaling channel connectivity changed
    ChannelState(ChannelState),
    /// The call was ended and all resources released
    Terminated,
}
