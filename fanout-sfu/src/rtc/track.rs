//! Forwarded media tracks
//!
//! Every inbound track is re-published as one local RTP track. The local track
//! is bound to every consumer that carries it, so each packet is read once and
//! written once regardless of how many peers receive it.

use crate::engine::MediaTrack;
use crate::types::TrackKind;
use parking_lot::RwLock;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::marshal::MarshalSize;

/// Interval between keyframe requests sent upstream for video tracks
pub const PLI_INTERVAL: Duration = Duration::from_secs(3);

impl From<RTPCodecType> for TrackKind {
    fn from(codec_type: RTPCodecType) -> Self {
        match codec_type {
            RTPCodecType::Audio => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// Counters updated by the forwarding task
#[derive(Default)]
struct TrackStatsInner {
    packets_forwarded: AtomicU64,
    bytes_forwarded: AtomicU64,
    write_errors: AtomicU64,
    last_packet_time: RwLock<Option<Instant>>,
}

/// Snapshot of a forwarded track's counters
#[derive(Debug, Clone, Serialize)]
pub struct TrackStats {
    pub track_id: String,
    pub kind: TrackKind,
    pub packets_forwarded: u64,
    pub bytes_forwarded: u64,
    pub write_errors: u64,
    /// Milliseconds since the last packet, if any arrived
    pub idle_ms: Option<u64>,
}

/// An inbound track re-published for consumers
pub struct ForwardedTrack {
    id: String,
    kind: TrackKind,
    local: Arc<TrackLocalStaticRTP>,
    stats: Arc<TrackStatsInner>,
    stopped: CancellationToken,
}

impl fmt::Debug for ForwardedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardedTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl ForwardedTrack {
    /// Wrap a remote track and start forwarding its packets.
    ///
    /// `source` is the producing connection; it is only held weakly and is
    /// used to request keyframes for video.
    pub fn spawn(remote: Arc<TrackRemote>, source: Weak<RTCPeerConnection>) -> Arc<Self> {
        let kind = TrackKind::from(remote.kind());
        let codec = remote.codec();
        let id = remote.id();

        info!(
            track_id = %id,
            kind = %kind,
            codec = %codec.capability.mime_type,
            ssrc = remote.ssrc(),
            "Forwarding track"
        );

        let track = Arc::new(Self {
            local: Arc::new(TrackLocalStaticRTP::new(
                codec.capability,
                id.clone(),
                remote.stream_id(),
            )),
            id,
            kind,
            stats: Arc::new(TrackStatsInner::default()),
            stopped: CancellationToken::new(),
        });

        tokio::spawn(Arc::clone(&track).forward(Arc::clone(&remote)));
        if kind == TrackKind::Video {
            tokio::spawn(Arc::clone(&track).request_keyframes(remote.ssrc(), source));
        }

        track
    }

    /// Local track to bind to consumer connections
    #[must_use]
    pub fn local(&self) -> Arc<TrackLocalStaticRTP> {
        Arc::clone(&self.local)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Stop forwarding; the reader task exits on its next packet.
    pub fn stop(&self) {
        self.stopped.cancel();
    }

    #[must_use]
    pub fn stats(&self) -> TrackStats {
        TrackStats {
            track_id: self.id.clone(),
            kind: self.kind,
            packets_forwarded: self.stats.packets_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.stats.bytes_forwarded.load(Ordering::Relaxed),
            write_errors: self.stats.write_errors.load(Ordering::Relaxed),
            idle_ms: self
                .stats
                .last_packet_time
                .read()
                .map(|at| u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX)),
        }
    }

    async fn forward(self: Arc<Self>, remote: Arc<TrackRemote>) {
        loop {
            let packet = tokio::select! {
                () = self.stopped.cancelled() => break,
                read = remote.read_rtp() => match read {
                    Ok((packet, _attributes)) => packet,
                    Err(e) => {
                        debug!(track_id = %self.id, error = %e, "Remote track ended");
                        break;
                    }
                },
            };

            let size = packet.header.marshal_size() + packet.payload.len();
            *self.stats.last_packet_time.write() = Some(Instant::now());

            // no bound consumers is not an error for a static track
            match self.local.write_rtp(&packet).await {
                Ok(_) => {
                    self.stats.packets_forwarded.fetch_add(1, Ordering::Relaxed);
                    self.stats.bytes_forwarded.fetch_add(size as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(track_id = %self.id, error = %e, "Failed to forward RTP packet");
                }
            }
        }

        self.stopped.cancel();
        let stats = self.stats();
        info!(
            track_id = %self.id,
            packets = stats.packets_forwarded,
            bytes = stats.bytes_forwarded,
            write_errors = stats.write_errors,
            "RTP forwarder stopped"
        );
    }

    async fn request_keyframes(self: Arc<Self>, media_ssrc: u32, source: Weak<RTCPeerConnection>) {
        let mut ticker = tokio::time::interval(PLI_INTERVAL);
        loop {
            tokio::select! {
                () = self.stopped.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(connection) = source.upgrade() else {
                break;
            };
            let pli = PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            };
            if let Err(e) = connection.write_rtcp(&[Box::new(pli)]).await {
                debug!(track_id = %self.id, error = %e, "Failed to send PLI");
            }
        }
    }
}

impl MediaTrack for ForwardedTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_type_to_kind() {
        assert_eq!(TrackKind::from(RTPCodecType::Audio), TrackKind::Audio);
        assert_eq!(TrackKind::from(RTPCodecType::Video), TrackKind::Video);
        assert_eq!(TrackKind::from(RTPCodecType::Unspecified), TrackKind::Video);
    }
}
