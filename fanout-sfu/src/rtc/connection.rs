//! `webrtc` crate backed peer connections

use super::track::ForwardedTrack;
use crate::engine::{
    ChannelKind, ConnectionState, DataChannel, EngineEvent, EventSink, PeerConnection, TrackRef,
};
use crate::error::EngineError;
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
            _ => Self::New,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let converted = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            return Err(EngineError::InvalidDescription(
                "rollback is not supported".to_string(),
            ))
        }
    };
    converted.map_err(|e| EngineError::InvalidDescription(e.to_string()))
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription, EngineError> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => {
            return Err(EngineError::InvalidDescription(format!(
                "unexpected sdp type {other}"
            )))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

/// Negotiated data channel on an [`RtcPeerConnection`]
pub struct RtcDataChannel {
    kind: ChannelKind,
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn is_open(&self) -> bool {
        self.channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> Result<(), EngineError> {
        self.channel.send_text(text).await?;
        Ok(())
    }
}

pub struct RtcPeerConnection {
    connection: Arc<RTCPeerConnection>,
    events: EventSink,
    /// Inbound tracks, stopped when the connection closes
    received: Arc<Mutex<Vec<Arc<ForwardedTrack>>>>,
}

impl RtcPeerConnection {
    /// Wire the connection's callbacks into `events`.
    pub fn new(connection: Arc<RTCPeerConnection>, events: EventSink) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = events.clone();
        connection.on_ice_candidate(Box::new(move |candidate| {
            match candidate.map(|c| c.to_json()).transpose() {
                Ok(candidate) => sink.emit(EngineEvent::IceCandidate(candidate.map(IceCandidate::from))),
                Err(e) => {
                    warn!(connection = %sink.key(), error = %e, "Failed to serialize local candidate");
                }
            }
            Box::pin(async {})
        }));

        let sink = events.clone();
        connection.on_negotiation_needed(Box::new(move || {
            sink.emit(EngineEvent::NegotiationNeeded);
            Box::pin(async {})
        }));

        let sink = events.clone();
        connection.on_peer_connection_state_change(Box::new(move |state| {
            sink.emit(EngineEvent::ConnectionStateChange(state.into()));
            Box::pin(async {})
        }));

        let sink = events.clone();
        let source = Arc::downgrade(&connection);
        let tracks = Arc::clone(&received);
        connection.on_track(Box::new(move |remote, _receiver, _transceiver| {
            let track = ForwardedTrack::spawn(remote, source.clone());
            tracks.lock().push(Arc::clone(&track));
            sink.emit(EngineEvent::Track(track));
            Box::pin(async {})
        }));

        Self {
            connection,
            events,
            received,
        }
    }
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        from_rtc_description(self.connection.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        from_rtc_description(self.connection.create_answer(None).await?)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), EngineError> {
        self.connection
            .set_local_description(to_rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let description = self.connection.local_description().await?;
        from_rtc_description(description).ok()
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), EngineError> {
        self.connection
            .set_remote_description(to_rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.connection.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.connection.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn add_track(&self, track: TrackRef) -> Result<(), EngineError> {
        let Some(forwarded) = track.as_any().downcast_ref::<ForwardedTrack>() else {
            return Err(EngineError::UnsupportedTrack(track.id().to_string()));
        };
        if forwarded.is_stopped() {
            return Err(EngineError::UnsupportedTrack(format!("{} has stopped", track.id())));
        }

        let local: Arc<dyn TrackLocal + Send + Sync> = forwarded.local();
        let sender = self.connection.add_track(local).await?;

        // RTCP has to be read for interceptors such as NACK to run
        let key = self.events.key().clone();
        tokio::spawn(async move {
            while sender.read_rtcp().await.is_ok() {}
            debug!(connection = %key, "RTCP reader stopped");
        });
        Ok(())
    }

    async fn create_data_channel(&self, kind: ChannelKind) -> Result<Arc<dyn DataChannel>, EngineError> {
        let init = RTCDataChannelInit {
            negotiated: Some(kind.stream_id()),
            ..Default::default()
        };
        let channel = self
            .connection
            .create_data_channel(kind.label(), Some(init))
            .await?;

        let sink = self.events.clone();
        channel.on_message(Box::new(move |message| {
            sink.emit(EngineEvent::DataChannelMessage {
                channel: kind,
                data: String::from_utf8_lossy(&message.data).into_owned(),
            });
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcDataChannel { kind, channel }))
    }

    async fn close(&self) -> Result<(), EngineError> {
        for track in self.received.lock().drain(..) {
            track.stop();
        }
        self.connection.close().await?;
        Ok(())
    }
}
