//! SFU registry, signaling dispatch and fan-out
//!
//! This module provides:
//! - The client registry keyed by peer id
//! - Routing of signaling messages to producers and consumers
//! - Track, feature and chat fan-out, including catch-up for late joiners
//! - Disconnect cleanup across all remaining clients
//!
//! Everything runs on one dispatch loop: signaling messages and engine events
//! are handled one at a time, so the registry needs no locking.

use crate::client::Client;
use crate::config::SfuConfig;
use crate::engine::{ConnectionEvent, ConnectionRole, PeerConnectionFactory, TrackRef};
use crate::error::Result;
use crate::events::SfuEvent;
use crate::signaling::{Handshake, InboundMessage, OutboundMessage, SignalingSender};
use crate::types::{FeatureSet, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Snapshot of the registry, published after every dispatched item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SfuStats {
    pub sfu_id: String,
    /// Number of registered clients
    pub clients: usize,
    /// Total consumers across all clients
    pub consumers: usize,
    /// Producer tracks currently held across all clients
    pub tracks: usize,
}

pub struct Sfu {
    config: SfuConfig,
    factory: Arc<dyn PeerConnectionFactory>,
    clients: HashMap<PeerId, Client>,
    signaling: SignalingSender,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    pending: VecDeque<SfuEvent>,
    stats: watch::Sender<SfuStats>,
}

impl Sfu {
    pub fn new(
        config: SfuConfig,
        factory: Arc<dyn PeerConnectionFactory>,
        signaling: SignalingSender,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stats, _) = watch::channel(SfuStats {
            sfu_id: config.sfu_id.to_string(),
            ..Default::default()
        });

        info!(
            sfu_id = %config.sfu_id,
            ice_servers = config.rtc_configuration.ice_servers.len(),
            "SFU initialized"
        );

        Self {
            config,
            factory,
            clients: HashMap::new(),
            signaling,
            events_tx,
            events_rx,
            pending: VecDeque::new(),
            stats,
        }
    }

    #[must_use]
    pub const fn sfu_id(&self) -> &PeerId {
        &self.config.sfu_id
    }

    /// Announcement to send when the signaling connection opens
    #[must_use]
    pub fn identify_message(&self) -> OutboundMessage {
        OutboundMessage::identify(&self.config.sfu_id)
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn find_client(&self, id: &PeerId) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Receiver for registry snapshots
    #[must_use]
    pub fn subscribe_stats(&self) -> watch::Receiver<SfuStats> {
        self.stats.subscribe()
    }

    /// Run the dispatch loop until the inbound channel closes or `shutdown`
    /// is cancelled, then prune every client.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
        shutdown: CancellationToken,
    ) {
        info!(sfu_id = %self.config.sfu_id, "SFU dispatch loop started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("SFU shutdown requested");
                    break;
                }
                message = inbound.recv() => {
                    let Some(message) = message else {
                        warn!("Signaling channel closed, stopping SFU");
                        break;
                    };
                    self.handle_message(message).await;
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_connection_event(event).await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Dispatch one signaling message.
    pub async fn handle_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Producer(handshake) => {
                debug!(sender = %handshake.sender, "Producer handshake");
                self.handle_producer_handshake(handshake).await;
            }
            InboundMessage::Consumer(handshake) => {
                debug!(sender = %handshake.sender, "Consumer handshake");
                self.handle_consumer_handshake(handshake).await;
            }
            InboundMessage::ClientDisconnect { client_id } => {
                info!(client_id = %client_id, "Got a client disconnect message");
                self.handle_client_disconnect(&client_id).await;
            }
            InboundMessage::Unknown => {
                warn!("Invalid handshake type, ignoring message");
            }
        }
        self.process_pending().await;
    }

    /// Dispatch one engine event to the connection it belongs to.
    pub async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        let ConnectionEvent {
            key,
            generation,
            event,
        } = event;
        let Some(client) = self.clients.get_mut(&key.client_id) else {
            debug!(connection = %key, "Event for unknown client, dropping");
            return;
        };

        match &key.role {
            ConnectionRole::Producer => {
                let producer = client.producer_mut();
                if producer.generation() != generation {
                    debug!(connection = %key, generation, "Event from a closed session, dropping");
                    return;
                }
                if let Some(sfu_event) = producer.handle_event(event) {
                    self.pending.push_back(sfu_event);
                }
            }
            ConnectionRole::Consumer(remote_peer_id) => match client.find_consumer_mut(remote_peer_id) {
                Some(consumer) if consumer.generation() == generation => {
                    consumer.handle_event(event).await;
                }
                Some(_) => {
                    debug!(connection = %key, generation, "Event from a closed consumer, dropping");
                }
                None => debug!(connection = %key, "Event for removed consumer, dropping"),
            },
        }
        self.process_pending().await;
    }

    async fn handle_producer_handshake(&mut self, handshake: Handshake) {
        let sender = handshake.sender.clone();
        if !self.clients.contains_key(&sender) {
            if let Err(e) = self.add_client(sender.clone()).await {
                error!(client_id = %sender, error = %e, "Failed to create client");
                return;
            }
        }
        if let Some(client) = self.clients.get_mut(&sender) {
            client.producer_handshake(handshake).await;
        }
    }

    async fn handle_consumer_handshake(&mut self, handshake: Handshake) {
        match self.clients.get_mut(&handshake.sender) {
            Some(client) => client.consumer_handshake(handshake).await,
            None => {
                warn!(sender = %handshake.sender, "Consumer handshake from unknown client, dropping");
            }
        }
    }

    async fn add_client(&mut self, id: PeerId) -> Result<()> {
        let client = Client::new(
            id.clone(),
            self.config.sfu_id.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.config.rtc_configuration),
            self.events_tx.clone(),
            self.signaling.clone(),
        )
        .await?;
        self.clients.insert(id.clone(), client);

        info!(client_id = %id, total_clients = self.clients.len(), "Added client");
        Ok(())
    }

    /// Prune the departed client, then close every consumer other clients
    /// hold toward it.
    pub async fn handle_client_disconnect(&mut self, client_id: &PeerId) {
        let Some(mut closed) = self.clients.remove(client_id) else {
            warn!(client_id = %client_id, "Disconnect for unknown client");
            return;
        };
        closed.prune_client().await;

        let mut removed = 0;
        for client in self.clients.values_mut() {
            if client.remove_consumer(client_id).await {
                removed += 1;
            }
        }

        info!(
            client_id = %client_id,
            consumers_removed = removed,
            remaining_clients = self.clients.len(),
            "Removed client"
        );
    }

    async fn process_pending(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            debug!(event = event.name(), "Handling SFU event");
            match event {
                SfuEvent::ProducerTrackAdded { id, track } => {
                    self.handle_producer_track(&id, track).await;
                }
                SfuEvent::FeaturesShared {
                    id,
                    features,
                    initial_connect,
                } => {
                    self.handle_features_shared(&id, features, initial_connect).await;
                }
                SfuEvent::ChatMessage { id, message } => {
                    self.handle_chat_message(&id, &message).await;
                }
            }
        }
        self.publish_stats();
    }

    /// Forward a new track to every other client. The producing client's
    /// first track instead triggers its one-time catch-up.
    async fn handle_producer_track(&mut self, id: &PeerId, track: TrackRef) {
        let mut needs_catch_up = false;
        for (client_id, client) in &mut self.clients {
            if client_id == id {
                needs_catch_up = client.begin_catch_up();
                continue;
            }
            if let Err(e) = client.add_consumer_track(id, Arc::clone(&track)).await {
                error!(client_id = %client_id, remote_peer_id = %id, error = %e, "Failed to forward track");
            }
        }

        if needs_catch_up {
            self.consumer_catchup(id).await;
        }
    }

    /// Give a peer every track that other clients were already producing.
    async fn consumer_catchup(&mut self, catchup_client_id: &PeerId) {
        let existing: Vec<(PeerId, Vec<TrackRef>)> = self
            .clients
            .iter()
            .filter(|(client_id, _)| *client_id != catchup_client_id)
            .map(|(client_id, client)| (client_id.clone(), client.producer().media_tracks()))
            .collect();

        let Some(catchup_client) = self.clients.get_mut(catchup_client_id) else {
            return;
        };

        info!(client_id = %catchup_client_id, peers = existing.len(), "Consumer catch-up");
        for (client_id, tracks) in existing {
            for track in tracks {
                if let Err(e) = catchup_client.add_consumer_track(&client_id, track).await {
                    error!(client_id = %catchup_client_id, remote_peer_id = %client_id, error = %e, "Failed to catch up track");
                }
            }
        }
    }

    async fn handle_features_shared(&mut self, id: &PeerId, features: FeatureSet, initial_connect: bool) {
        if initial_connect {
            self.features_catchup(id).await;
        }

        for (client_id, client) in &mut self.clients {
            if client_id == id {
                client.set_features(features.clone());
            } else {
                client.share_features(id, &features).await;
            }
        }
    }

    /// Send every other client's cached features to a newly connected peer.
    async fn features_catchup(&self, catchup_client_id: &PeerId) {
        let Some(catchup_client) = self.clients.get(catchup_client_id) else {
            return;
        };

        for (client_id, client) in &self.clients {
            if client_id != catchup_client_id {
                catchup_client.share_features(client_id, client.features()).await;
            }
        }
    }

    async fn handle_chat_message(&self, id: &PeerId, message: &str) {
        for (client_id, client) in &self.clients {
            if client_id != id {
                client.send_chat_message(id, message).await;
            }
        }
    }

    fn publish_stats(&self) {
        let stats = SfuStats {
            sfu_id: self.config.sfu_id.to_string(),
            clients: self.clients.len(),
            consumers: self.clients.values().map(Client::consumer_count).sum(),
            tracks: self
                .clients
                .values()
                .map(|client| client.producer().media_tracks().len())
                .sum(),
        };
        self.stats.send_if_modified(|current| {
            if *current == stats {
                false
            } else {
                *current = stats;
                true
            }
        });
    }

    /// Prune every client.
    pub async fn shutdown(&mut self) {
        for (_, mut client) in self.clients.drain() {
            client.prune_client().await;
        }
        self.publish_stats();
        info!(sfu_id = %self.config.sfu_id, "SFU stopped");
    }

    /// Handle every engine event already queued, including ones raised while
    /// handling earlier events.
    #[cfg(test)]
    pub(crate) async fn settle(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_connection_event(event).await;
        }
    }
}
