//! Peer-connection engine contract
//!
//! The SFU never talks to a WebRTC stack directly. It drives connections
//! through [`PeerConnection`] and receives everything the stack reports as
//! [`ConnectionEvent`]s on a single channel, so all state changes happen in
//! the SFU's dispatch loop rather than inside engine callbacks.

use crate::config::RtcConfiguration;
use crate::error::EngineError;
use crate::signaling::{IceCandidate, SessionDescription};
use crate::types::{PeerId, TrackKind};
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// A media track that can be forwarded to other connections.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Lets an engine recover its own concrete track type.
    fn as_any(&self) -> &dyn Any;
}

pub type TrackRef = Arc<dyn MediaTrack>;

/// Aggregate connection state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// The two pre-negotiated data channels every producer opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Chat,
    Features,
}

impl ChannelKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Features => "features",
        }
    }

    /// Fixed SCTP stream id agreed with clients out of band
    #[must_use]
    pub const fn stream_id(self) -> u16 {
        match self {
            Self::Chat => 100,
            Self::Features => 110,
        }
    }
}

/// Which connection of a client an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    Producer,
    Consumer(PeerId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub client_id: PeerId,
    pub role: ConnectionRole,
}

impl ConnectionKey {
    #[must_use]
    pub const fn producer(client_id: PeerId) -> Self {
        Self {
            client_id,
            role: ConnectionRole::Producer,
        }
    }

    #[must_use]
    pub const fn consumer(client_id: PeerId, remote_peer_id: PeerId) -> Self {
        Self {
            client_id,
            role: ConnectionRole::Consumer(remote_peer_id),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.role {
            ConnectionRole::Producer => write!(f, "producer:{}", self.client_id),
            ConnectionRole::Consumer(remote) => {
                write!(f, "consumer:{}<-{}", self.client_id, remote)
            }
        }
    }
}

/// Something the engine observed on a connection
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Locally gathered candidate; `None` once gathering completes
    IceCandidate(Option<IceCandidate>),
    Track(TrackRef),
    NegotiationNeeded,
    ConnectionStateChange(ConnectionState),
    DataChannelMessage { channel: ChannelKind, data: String },
}

/// Source of connection generations; every sink gets a fresh one.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub key: ConnectionKey,
    /// Generation of the connection that raised the event. A peer id can be
    /// reused after a disconnect, so the key alone does not identify it.
    pub generation: u64,
    pub event: EngineEvent,
}

/// Handle an engine uses to report events for one connection.
#[derive(Debug, Clone)]
pub struct EventSink {
    key: ConnectionKey,
    generation: u64,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(key: ConnectionKey, tx: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self {
            key,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &ConnectionKey {
        &self.key
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue an event for the dispatch loop. Events raised after the SFU
    /// stopped are discarded.
    pub fn emit(&self, event: EngineEvent) {
        let event = ConnectionEvent {
            key: self.key.clone(),
            generation: self.generation,
            event,
        };
        if self.tx.send(event).is_err() {
            debug!(connection = %self.key, "Dispatch loop gone, dropping engine event");
        }
    }
}

/// A negotiated data channel
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> Result<(), EngineError>;
}

/// One peer connection inside the engine
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), EngineError>;

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), EngineError>;

    async fn has_remote_description(&self) -> bool;

    /// Fails on malformed candidates; callers must treat that as non-fatal.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    async fn add_track(&self, track: TrackRef) -> Result<(), EngineError>;

    /// Opens a channel with `negotiated: true` and the kind's fixed id.
    async fn create_data_channel(&self, kind: ChannelKind) -> Result<Arc<dyn DataChannel>, EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Creates peer connections that report through the given sink
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        config: &RtcConfiguration,
        events: EventSink,
    ) -> Result<Arc<dyn PeerConnection>, EngineError>;
}
