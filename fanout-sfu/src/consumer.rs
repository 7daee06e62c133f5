//! Outbound connection carrying one remote peer's media to a client
//!
//! The SFU initiates: every track it attaches makes the engine ask for
//! negotiation, the consumer offers, and the client answers.

use crate::config::RtcConfiguration;
use crate::engine::{
    ConnectionEvent, ConnectionKey, EngineEvent, EventSink, PeerConnection,
    PeerConnectionFactory, TrackRef,
};
use crate::error::Result;
use crate::ice::CandidateQueue;
use crate::producer::log_state_change;
use crate::sdp::modify_ice_attributes;
use crate::signaling::{
    HandshakeRole, IceCandidate, OutboundHandshake, OutboundMessage, SessionDescription,
    SignalingSender,
};
use crate::types::PeerId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Negotiation state of a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Nothing offered yet
    Idle,
    /// Offer sent, waiting for the client's answer
    Offering,
    /// Answer applied
    Stable,
}

pub struct Consumer {
    key: ConnectionKey,
    generation: u64,
    sfu_id: PeerId,
    remote_peer_id: PeerId,
    connection: Arc<dyn PeerConnection>,
    signaling: SignalingSender,
    state: ConsumerState,
    /// Negotiation was requested while an offer was outstanding
    renegotiate: bool,
    candidates: CandidateQueue,
    track_ids: Vec<String>,
}

impl Consumer {
    pub async fn new(
        sfu_id: PeerId,
        client_id: PeerId,
        remote_peer_id: PeerId,
        factory: &dyn PeerConnectionFactory,
        rtc_configuration: &RtcConfiguration,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        signaling: SignalingSender,
    ) -> Result<Self> {
        let key = ConnectionKey::consumer(client_id, remote_peer_id.clone());
        let sink = EventSink::new(key.clone(), events);
        let generation = sink.generation();
        let connection = factory.create(rtc_configuration, sink).await?;

        info!(connection = %key, "A new consumer is added");

        Ok(Self {
            key,
            generation,
            sfu_id,
            remote_peer_id,
            connection,
            signaling,
            state: ConsumerState::Idle,
            renegotiate: false,
            candidates: CandidateQueue::new(),
            track_ids: Vec::new(),
        })
    }

    #[must_use]
    pub const fn remote_peer_id(&self) -> &PeerId {
        &self.remote_peer_id
    }

        #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn state(&self) -> ConsumerState {
        self.state
    }

    #[must_use]
    pub fn carries_track(&self, track_id: &str) -> bool {
        self.track_ids.iter().any(|id| id == track_id)
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.track_ids.len()
    }

    #[must_use]
    pub fn queued_candidates(&self) -> usize {
        self.candidates.len()
    }

    /// Attach a track from the remote peer. A track already carried is not
    /// added twice. Returns whether the track was attached.
    pub async fn add_track(&mut self, track: TrackRef) -> bool {
        if self.carries_track(track.id()) {
            debug!(connection = %self.key, track_id = track.id(), "Track already forwarded");
            return false;
        }

        match self.connection.add_track(Arc::clone(&track)).await {
            Ok(()) => {
                debug!(connection = %self.key, kind = %track.kind(), track_id = track.id(), "Track attached");
                self.track_ids.push(track.id().to_string());
                true
            }
            Err(e) => {
                error!(connection = %self.key, track_id = track.id(), error = %e, "Failed to add track");
                false
            }
        }
    }

    /// React to an engine event on this connection.
    pub async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::IceCandidate(Some(candidate)) => self.send(None, Some(candidate)),
            EngineEvent::IceCandidate(None) => {}
            EngineEvent::NegotiationNeeded => self.handle_negotiation_needed().await,
            EngineEvent::ConnectionStateChange(state) => log_state_change(&self.key, state),
            EngineEvent::Track(track) => {
                debug!(connection = %self.key, track_id = track.id(), "Ignoring inbound track on consumer");
            }
            EngineEvent::DataChannelMessage { channel, .. } => {
                debug!(connection = %self.key, channel = channel.label(), "Ignoring data channel message on consumer");
            }
        }
    }

    pub async fn handle_negotiation_needed(&mut self) {
        if self.state == ConsumerState::Offering {
            debug!(connection = %self.key, "Offer outstanding, renegotiating after answer");
            self.renegotiate = true;
            return;
        }

        if let Err(e) = self.offer().await {
            error!(connection = %self.key, error = %e, "Failed to create consumer offer");
        }
    }

    async fn offer(&mut self) -> Result<()> {
        info!(connection = %self.key, "Consumer attempting offer");
        let offer = self.connection.create_offer().await?;
        self.connection.set_local_description(offer.clone()).await?;
        let description = self.connection.local_description().await.unwrap_or(offer);

        self.state = ConsumerState::Offering;
        self.send(Some(description), None);
        Ok(())
    }

    /// Handle a `consumer` signaling message from the client.
    pub async fn handshake(
        &mut self,
        description: Option<SessionDescription>,
        candidate: Option<IceCandidate>,
    ) {
        if let Some(description) = description {
            self.apply_answer(description).await;
        }
        if let Some(candidate) = candidate {
            self.candidates
                .apply_or_queue(self.connection.as_ref(), candidate, &self.key)
                .await;
        }
    }

    async fn apply_answer(&mut self, mut description: SessionDescription) {
        if self.state != ConsumerState::Offering {
            debug!(connection = %self.key, state = ?self.state, "No offer outstanding, dropping description");
            return;
        }

        debug!(connection = %self.key, sdp_type = ?description.sdp_type, "Got a description, setting");
        description.sdp = modify_ice_attributes(&description.sdp);
        if let Err(e) = self.connection.set_remote_description(description).await {
            // the offer stays outstanding; candidates from the rejected answer are stale
            error!(connection = %self.key, error = %e, "Failed to set remote description");
            self.candidates.clear();
            return;
        }
        self.state = ConsumerState::Stable;
        self.candidates.drain(self.connection.as_ref(), &self.key).await;

        if std::mem::take(&mut self.renegotiate) {
            if let Err(e) = self.offer().await {
                error!(connection = %self.key, error = %e, "Failed to renegotiate consumer");
            }
        }
    }

    pub async fn close_connection(&self) {
        if let Err(e) = self.connection.close().await {
            warn!(connection = %self.key, error = %e, "Failed to close consumer connection");
        }
    }

    fn send(&self, description: Option<SessionDescription>, candidate: Option<IceCandidate>) {
        let message = OutboundMessage::Handshake(OutboundHandshake {
            role: HandshakeRole::Consumer,
            sender: self.sfu_id.clone(),
            receiver: self.key.client_id.clone(),
            remote_peer_id: Some(self.remote_peer_id.clone()),
            description,
            candidate,
        });
        if self.signaling.send(message).is_err() {
            warn!(connection = %self.key, "Signaling channel closed, dropping consumer handshake");
        }
    }
}
