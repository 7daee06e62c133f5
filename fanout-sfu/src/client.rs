//! Per-peer session: one producer plus a consumer toward every other peer
//! whose media this peer receives.

use crate::config::RtcConfiguration;
use crate::consumer::Consumer;
use crate::engine::{ConnectionEvent, PeerConnectionFactory, TrackRef};
use crate::error::Result;
use crate::producer::Producer;
use crate::signaling::{Handshake, SignalingSender};
use crate::types::{FeatureSet, PeerId, TrackKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

pub struct Client {
    id: PeerId,
    sfu_id: PeerId,
    factory: Arc<dyn PeerConnectionFactory>,
    rtc_configuration: Arc<RtcConfiguration>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    signaling: SignalingSender,
    producer: Producer,
    consumers: HashMap<PeerId, Consumer>,
    /// Set once this peer's first track has triggered its catch-up
    caught_up: bool,
}

impl Client {
    pub async fn new(
        id: PeerId,
        sfu_id: PeerId,
        factory: Arc<dyn PeerConnectionFactory>,
        rtc_configuration: Arc<RtcConfiguration>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        signaling: SignalingSender,
    ) -> Result<Self> {
        let producer = Producer::new(
            sfu_id.clone(),
            id.clone(),
            factory.as_ref(),
            &rtc_configuration,
            events.clone(),
            signaling.clone(),
        )
        .await?;

        Ok(Self {
            id,
            sfu_id,
            factory,
            rtc_configuration,
            events,
            signaling,
            producer,
            consumers: HashMap::new(),
            caught_up: false,
        })
    }

    #[must_use]
    pub const fn id(&self) -> &PeerId {
        &self.id
    }

    #[must_use]
    pub const fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn producer_mut(&mut self) -> &mut Producer {
        &mut self.producer
    }

    pub async fn producer_handshake(&mut self, handshake: Handshake) {
        self.producer
            .handshake(handshake.description, handshake.candidate)
            .await;
    }

    /// Route a `consumer` message to the consumer toward `remotePeerId`.
    /// Consumers are only created by [`Client::add_consumer_track`], so a
    /// message for an unknown consumer is logged and dropped.
    pub async fn consumer_handshake(&mut self, handshake: Handshake) {
        let Some(remote_peer_id) = handshake.remote_peer_id else {
            error!(client_id = %self.id, "Consumer handshake without remotePeerId");
            return;
        };
        let Some(consumer) = self.consumers.get_mut(&remote_peer_id) else {
            error!(client_id = %self.id, remote_peer_id = %remote_peer_id, "No consumer for handshake");
            return;
        };
        consumer
            .handshake(handshake.description, handshake.candidate)
            .await;
    }

    #[must_use]
    pub fn get_producer_track(&self, kind: TrackKind) -> Option<TrackRef> {
        self.producer.track(kind)
    }

    /// Forward `track` from `remote_peer_id`, creating the consumer on first use.
    pub async fn add_consumer_track(&mut self, remote_peer_id: &PeerId, track: TrackRef) -> Result<()> {
        if !self.consumers.contains_key(remote_peer_id) {
            let consumer = Consumer::new(
                self.sfu_id.clone(),
                self.id.clone(),
                remote_peer_id.clone(),
                self.factory.as_ref(),
                &self.rtc_configuration,
                self.events.clone(),
                self.signaling.clone(),
            )
            .await?;
            self.consumers.insert(remote_peer_id.clone(), consumer);
        }

        if let Some(consumer) = self.consumers.get_mut(remote_peer_id) {
            consumer.add_track(track).await;
        }
        Ok(())
    }

    #[must_use]
    pub fn find_consumer(&self, remote_peer_id: &PeerId) -> Option<&Consumer> {
        self.consumers.get(remote_peer_id)
    }

    pub fn find_consumer_mut(&mut self, remote_peer_id: &PeerId) -> Option<&mut Consumer> {
        self.consumers.get_mut(remote_peer_id)
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Close and forget the consumer toward a departed peer.
    pub async fn remove_consumer(&mut self, remote_peer_id: &PeerId) -> bool {
        match self.consumers.remove(remote_peer_id) {
            Some(consumer) => {
                consumer.close_connection().await;
                true
            }
            None => false,
        }
    }

    /// Marks the client caught up. Returns `true` only the first time.
    pub fn begin_catch_up(&mut self) -> bool {
        !std::mem::replace(&mut self.caught_up, true)
    }

    #[must_use]
    pub const fn is_caught_up(&self) -> bool {
        self.caught_up
    }

    pub async fn share_features(&self, id: &PeerId, features: &FeatureSet) {
        self.producer.share_features(id, features).await;
    }

    pub fn set_features(&mut self, features: FeatureSet) {
        self.producer.set_features(features);
    }

    #[must_use]
    pub const fn features(&self) -> &FeatureSet {
        self.producer.features()
    }

    pub async fn send_chat_message(&self, id: &PeerId, message: &str) {
        self.producer.send_chat_message(id, message).await;
    }

    /// Close the producer and every consumer owned by this client.
    pub async fn prune_client(&mut self) {
        info!(client_id = %self.id, consumers = self.consumers.len(), "Pruning client");
        self.producer.close_connection().await;
        for (_, consumer) in self.consumers.drain() {
            consumer.close_connection().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConnectionKey;
    use crate::signaling::SessionDescription;
    use crate::testing::{MockFactory, MockTrack};

    async fn client(factory: &Arc<MockFactory>) -> Client {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (signaling_tx, _signaling_rx) = mpsc::unbounded_channel();
        Client::new(
            PeerId::from("2"),
            PeerId::from("sfu"),
            Arc::clone(factory) as Arc<dyn PeerConnectionFactory>,
            Arc::new(RtcConfiguration::default()),
            events_tx,
            signaling_tx,
        )
        .await
        .unwrap()
    }

    fn handshake(remote: Option<&str>, description: Option<SessionDescription>) -> Handshake {
        Handshake {
            sender: PeerId::from("2"),
            receiver: None,
            description,
            candidate: None,
            remote_peer_id: remote.map(PeerId::from),
        }
    }

    #[tokio::test]
    async fn test_consumer_created_lazily_once() {
        let factory = MockFactory::new();
        let mut client = client(&factory).await;
        let remote = PeerId::from("1");

        client.add_consumer_track(&remote, MockTrack::new("a1", TrackKind::Audio)).await.unwrap();
        client.add_consumer_track(&remote, MockTrack::new("v1", TrackKind::Video)).await.unwrap();

        assert_eq!(client.consumer_count(), 1);
        assert_eq!(client.find_consumer(&remote).unwrap().track_count(), 2);
        // producer + one consumer
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn test_handshake_does_not_create_consumer() {
        let factory = MockFactory::new();
        let mut client = client(&factory).await;

        client
            .consumer_handshake(handshake(Some("1"), Some(SessionDescription::answer("v=0"))))
            .await;
        client
            .consumer_handshake(handshake(None, Some(SessionDescription::answer("v=0"))))
            .await;

        assert_eq!(client.consumer_count(), 0);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_begin_catch_up_once() {
        let factory = MockFactory::new();
        let mut client = client(&factory).await;

        assert!(!client.is_caught_up());
        assert!(client.begin_catch_up());
        assert!(!client.begin_catch_up());
        assert!(client.is_caught_up());
    }

    #[tokio::test]
    async fn test_prune_closes_everything() {
        let factory = MockFactory::new();
        let mut client = client(&factory).await;
        for remote in ["1", "3"] {
            client
                .add_consumer_track(&PeerId::from(remote), MockTrack::new(remote, TrackKind::Audio))
                .await
                .unwrap();
        }

        client.prune_client().await;

        assert_eq!(client.consumer_count(), 0);
        let producer = factory.connection(&ConnectionKey::producer(PeerId::from("2"))).unwrap();
        assert!(producer.is_closed());
        for remote in ["1", "3"] {
            let key = ConnectionKey::consumer(PeerId::from("2"), PeerId::from(remote));
            assert!(factory.connection(&key).unwrap().is_closed());
        }
    }

    #[tokio::test]
    async fn test_features_cache() {
        let factory = MockFactory::new();
        let mut client = client(&factory).await;

        assert_eq!(client.features(), &serde_json::json!({}));
        client.set_features(serde_json::json!({"muted": true}));
        assert_eq!(client.features(), &serde_json::json!({"muted": true}));
    }
}
