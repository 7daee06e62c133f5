//! Inbound connection carrying one peer's media to the SFU
//!
//! The remote peer always initiates: it sends an offer, the producer answers.
//! Exactly one remote description is ever applied per producer; later offers
//! are dropped rather than queued.

use crate::config::RtcConfiguration;
use crate::engine::{
    ChannelKind, ConnectionEvent, ConnectionKey, ConnectionState, DataChannel, EngineEvent,
    EventSink, PeerConnection, PeerConnectionFactory, TrackRef,
};
use crate::error::Result;
use crate::events::SfuEvent;
use crate::ice::CandidateQueue;
use crate::sdp::modify_ice_attributes;
use crate::signaling::{
    HandshakeRole, IceCandidate, OutboundHandshake, OutboundMessage, SdpType, SessionDescription,
    SignalingSender,
};
use crate::types::{empty_features, FeatureSet, PeerId, TrackKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Negotiation state of a producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// No remote description applied yet
    Idle,
    /// Remote offer being applied and answered
    Answering,
    /// Remote description in place; further offers are ignored
    Stable,
}

/// Inbound payload on the features channel
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeaturesPayload {
    #[serde(default)]
    id: Option<PeerId>,
    #[serde(default = "empty_features")]
    features: FeatureSet,
    #[serde(default)]
    initial_connect: bool,
}

#[derive(Serialize)]
struct SharedFeatures<'a> {
    id: &'a PeerId,
    features: &'a FeatureSet,
}

#[derive(Serialize)]
struct ChatPayload<'a> {
    id: &'a PeerId,
    message: &'a str,
}

pub struct Producer {
    key: ConnectionKey,
    generation: u64,
    sfu_id: PeerId,
    connection: Arc<dyn PeerConnection>,
    signaling: SignalingSender,
    state: ProducerState,
    media_tracks: HashMap<TrackKind, TrackRef>,
    candidates: CandidateQueue,
    chat_channel: Arc<dyn DataChannel>,
    features_channel: Arc<dyn DataChannel>,
    features: FeatureSet,
}

impl Producer {
    /// Create the connection and open both negotiated data channels.
    pub async fn new(
        sfu_id: PeerId,
        client_id: PeerId,
        factory: &dyn PeerConnectionFactory,
        rtc_configuration: &RtcConfiguration,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        signaling: SignalingSender,
    ) -> Result<Self> {
        let key = ConnectionKey::producer(client_id);
        let sink = EventSink::new(key.clone(), events);
        let generation = sink.generation();
        let connection = factory.create(rtc_configuration, sink).await?;
        let chat_channel = connection.create_data_channel(ChannelKind::Chat).await?;
        let features_channel = connection.create_data_channel(ChannelKind::Features).await?;

        debug!(connection = %key, "Producer created");

        Ok(Self {
            key,
            generation,
            sfu_id,
            connection,
            signaling,
            state: ProducerState::Idle,
            media_tracks: HashMap::new(),
            candidates: CandidateQueue::new(),
            chat_channel,
            features_channel,
            features: empty_features(),
        })
    }

    #[must_use]
    pub fn client_id(&self) -> &PeerId {
        &self.key.client_id
    }

    /// Generation of the underlying connection; events from any other
    /// generation belong to an earlier session.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn state(&self) -> ProducerState {
        self.state
    }

    #[must_use]
    pub fn track(&self, kind: TrackKind) -> Option<TrackRef> {
        self.media_tracks.get(&kind).cloned()
    }

    /// Current audio/video tracks, at most one per kind
    #[must_use]
    pub fn media_tracks(&self) -> Vec<TrackRef> {
        self.media_tracks.values().cloned().collect()
    }

    #[must_use]
    pub fn queued_candidates(&self) -> usize {
        self.candidates.len()
    }

    /// Handle a `producer` signaling message from the peer.
    pub async fn handshake(
        &mut self,
        description: Option<SessionDescription>,
        candidate: Option<IceCandidate>,
    ) {
        if let Some(description) = description {
            self.negotiate(description).await;
        }
        if let Some(candidate) = candidate {
            self.handle_received_ice_candidate(candidate).await;
        }
    }

    async fn negotiate(&mut self, mut description: SessionDescription) {
        debug!(connection = %self.key, sdp_type = ?description.sdp_type, "Trying to negotiate");

        if self.state != ProducerState::Idle || self.connection.has_remote_description().await {
            debug!(connection = %self.key, state = ?self.state, "Skipping negotiation");
            return;
        }

        self.state = ProducerState::Answering;
        description.sdp = modify_ice_attributes(&description.sdp);
        let sdp_type = description.sdp_type;

        if let Err(e) = self.connection.set_remote_description(description).await {
            error!(connection = %self.key, error = %e, "Failed to set remote description");
            self.state = ProducerState::Idle;
            return;
        }

        if sdp_type == SdpType::Offer {
            if let Err(e) = self.answer().await {
                // the remote description stays applied, so no retry is possible
                error!(connection = %self.key, error = %e, "Failed to answer producer offer");
            }
        }

        self.state = ProducerState::Stable;
        self.process_queued_candidates().await;
    }

    async fn answer(&self) -> Result<()> {
        let answer = self.connection.create_answer().await?;
        self.connection.set_local_description(answer.clone()).await?;
        let description = self.connection.local_description().await.unwrap_or(answer);

        info!(connection = %self.key, "Sending producer answer");
        self.send(Some(description), None);
        Ok(())
    }

    /// Apply a remote candidate, or queue it until the offer has been applied.
    pub async fn handle_received_ice_candidate(&mut self, candidate: IceCandidate) {
        self.candidates
            .apply_or_queue(self.connection.as_ref(), candidate, &self.key)
            .await;
    }

    pub async fn process_queued_candidates(&mut self) {
        self.candidates.drain(self.connection.as_ref(), &self.key).await;
    }

    /// React to an engine event on this connection.
    pub fn handle_event(&mut self, event: EngineEvent) -> Option<SfuEvent> {
        match event {
            EngineEvent::IceCandidate(Some(candidate)) => {
                debug!(connection = %self.key, "Sending producer ICE candidate");
                self.send(None, Some(candidate));
                None
            }
            EngineEvent::IceCandidate(None) => None,
            EngineEvent::Track(track) => Some(self.handle_track(track)),
            EngineEvent::NegotiationNeeded => {
                // the peer drives producer negotiation
                None
            }
            EngineEvent::ConnectionStateChange(state) => {
                log_state_change(&self.key, state);
                None
            }
            EngineEvent::DataChannelMessage { channel, data } => {
                self.handle_channel_message(channel, &data)
            }
        }
    }

    /// Store an inbound track, replacing any previous track of the same kind.
    pub fn handle_track(&mut self, track: TrackRef) -> SfuEvent {
        info!(connection = %self.key, kind = %track.kind(), track_id = track.id(), "Incoming track");
        self.media_tracks.insert(track.kind(), Arc::clone(&track));
        SfuEvent::ProducerTrackAdded {
            id: self.key.client_id.clone(),
            track,
        }
    }

    fn handle_channel_message(&self, channel: ChannelKind, data: &str) -> Option<SfuEvent> {
        match channel {
            ChannelKind::Chat => Some(SfuEvent::ChatMessage {
                id: self.key.client_id.clone(),
                message: data.to_string(),
            }),
            ChannelKind::Features => {
                let payload: FeaturesPayload = match serde_json::from_str(data) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(connection = %self.key, error = %e, "Malformed features payload");
                        return None;
                    }
                };
                if let Some(id) = payload.id.as_ref().filter(|id| **id != self.key.client_id) {
                    warn!(connection = %self.key, claimed = %id, "Features payload id does not match channel owner");
                }
                Some(SfuEvent::FeaturesShared {
                    id: self.key.client_id.clone(),
                    features: payload.features,
                    initial_connect: payload.initial_connect,
                })
            }
        }
    }

    /// Push another peer's features to this peer. Dropped if the channel is
    /// not open.
    pub async fn share_features(&self, id: &PeerId, features: &FeatureSet) {
        let payload = SharedFeatures { id, features };
        send_if_open(self.features_channel.as_ref(), &self.key, &payload).await;
    }

    /// Relay a chat message from `id` to this peer. Dropped if the channel is
    /// not open.
    pub async fn send_chat_message(&self, id: &PeerId, message: &str) {
        let payload = ChatPayload { id, message };
        send_if_open(self.chat_channel.as_ref(), &self.key, &payload).await;
    }

    pub fn set_features(&mut self, features: FeatureSet) {
        self.features = features;
    }

    #[must_use]
    pub const fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub async fn close_connection(&self) {
        if let Err(e) = self.connection.close().await {
            warn!(connection = %self.key, error = %e, "Failed to close producer connection");
        }
    }

    fn send(&self, description: Option<SessionDescription>, candidate: Option<IceCandidate>) {
        let message = OutboundMessage::Handshake(OutboundHandshake {
            role: HandshakeRole::Producer,
            sender: self.sfu_id.clone(),
            receiver: self.key.client_id.clone(),
            remote_peer_id: None,
            description,
            candidate,
        });
        if self.signaling.send(message).is_err() {
            warn!(connection = %self.key, "Signaling channel closed, dropping producer handshake");
        }
    }
}

async fn send_if_open<T: Serialize>(channel: &dyn DataChannel, key: &ConnectionKey, payload: &T) {
    if !channel.is_open().await {
        debug!(connection = %key, channel = channel.kind().label(), "Channel not open, dropping message");
        return;
    }

    let text = match serde_json::to_string(payload) {
        Ok(text) => text,
        Err(e) => {
            error!(connection = %key, error = %e, "Failed to encode channel message");
            return;
        }
    };
    if let Err(e) = channel.send_text(text).await {
        warn!(connection = %key, channel = channel.kind().label(), error = %e, "Failed to send on data channel");
    }
}

pub(crate) fn log_state_change(key: &ConnectionKey, state: ConnectionState) {
    info!(connection = %key, state = ?state, "Connection state changed");
}
