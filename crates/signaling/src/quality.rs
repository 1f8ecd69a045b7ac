//! Link quality scoring
//!
//! A heuristic 0-100 score for display. It never influences negotiation or
//! recovery.
//!
//! Starting from 100:
//! - loss: minus `min(50, loss_rate * 50)`
//! - latency: minus `min(30, (rtt_ms - 150) / 10)` above 150ms
//! - frame rate: minus `(15 - fps) * 2` below 15 fps
//!
//! then clamped to [0, 100] and rounded.

use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::peer::link::PeerLink;

/// Inbound video counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundVideo {
    /// Cumulative packets received
    pub packets_received: Option<u64>,
    /// Cumulative packets lost
    pub packets_lost: Option<u64>,
    /// Decoded frames per second
    pub frames_per_second: Option<f64>,
}

/// Outbound video counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundVideo {
    /// Cumulative packets sent
    pub packets_sent: Option<u64>,
    /// Packets the remote side reported lost
    pub remote_packets_lost: Option<u64>,
}

/// Raw statistics pulled from a peer link on one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualitySample {
    /// Inbound video counters
    pub inbound_video: InboundVideo,
    /// Outbound video counters
    pub outbound_video: OutboundVideo,
    /// Round-trip time of the selected candidate pair, in seconds
    pub round_trip_time: Option<f64>,
    /// Cumulative bytes received on the selected candidate pair
    pub bytes_received: Option<u64>,
    /// Receive bitrate since the previous tick, filled in by the sampler
    pub bitrate_kbps: Option<f64>,
}

impl QualitySample {
    /// Fraction of packets lost
    ///
    /// Uses inbound video counters when the link reports them, otherwise the
    /// loss the remote side reports for what we send.
    pub fn loss_rate(&self) -> Option<f64> {
        let inbound = &self.inbound_video;
        if let (Some(lost), Some(received)) = (inbound.packets_lost, inbound.packets_received) {
            if received > 0 {
                return Some(lost as f64 / received as f64);
            }
        }

        let outbound = &self.outbound_video;
        match (outbound.remote_packets_lost, outbound.packets_sent) {
            (Some(lost), Some(sent)) if sent > 0 => Some(lost as f64 / sent as f64),
            _ => None,
        }
    }

    /// Reduce this sample to a 0-100 score
    pub fn score(&self) -> u8 {
        let mut score = 100.0_f64;

        if let Some(loss_rate) = self.loss_rate() {
            score -= (loss_rate * 50.0).min(50.0);
        }

        if let Some(rtt) = self.round_trip_time {
            let rtt_ms = rtt * 1000.0;
            if rtt_ms > 150.0 {
                score -= ((rtt_ms - 150.0) / 10.0).min(30.0);
            }
        }

        if let Some(fps) = self.inbound_video.frames_per_second {
            if fps < 15.0 {
                score -= (15.0 - fps.max(0.0)) * 2.0;
            }
        }

        score.clamp(0.0, 100.0).round() as u8
    }
}

/// Score plus the sample it was computed from
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    /// Score in [0, 100]
    pub score: u8,
    /// Sample the score was computed from
    pub sample: QualitySample,
}

/// Pulls statistics from the active link on each tick
#[derive(Debug, Default)]
pub struct QualitySampler {
    /// (link id, when, cumulative bytes) of the previous tick
    previous: Option<(u64, Instant, u64)>,
}

impl QualitySampler {
    /// Create a sampler with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample `link`; `None` when there is no link or its stats are unavailable
    pub async fn sample(&mut self, link: Option<&Arc<dyn PeerLink>>) -> Option<QualityReport> {
        let Some(link) = link else {
            self.previous = None;
            return None;
        };

        let mut sample = match link.stats().await {
            Ok(sample) => sample,
            Err(e) => {
                debug!(link_id = link.id(), "Skipping quality tick: {}", e);
                return None;
            }
        };

        let now = Instant::now();
        if let Some(bytes) = sample.bytes_received {
            if let Some((prev_link, prev_at, prev_bytes)) = self.previous {
                let elapsed = now.duration_since(prev_at).as_secs_f64();
                if prev_link == link.id() && elapsed > 0.0 && bytes >= prev_bytes {
                    sample.bitrate_kbps = Some((bytes - prev_bytes) as f64 * 8.0 / elapsed / 1000.0);
                }
            }
            self.previous = Some((link.id(), now, bytes));
        }

        Some(QualityReport {
            score: sample.score(),
            sample,
        })
    }
}
