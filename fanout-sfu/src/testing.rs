//! In-memory engine used by unit tests

use crate::config::RtcConfiguration;
use crate::engine::{
    ChannelKind, ConnectionKey, DataChannel, EngineEvent, EventSink, MediaTrack, PeerConnection,
    PeerConnectionFactory, TrackRef,
};
use crate::error::EngineError;
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::types::TrackKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: TrackKind,
}

impl MockTrack {
    pub fn new(id: &str, kind: TrackKind) -> TrackRef {
        Arc::new(Self {
            id: id.to_string(),
            kind,
        })
    }
}

impl MediaTrack for MockTrack {
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

pub struct MockChannel {
    kind: ChannelKind,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }
}

#[async_trait]
impl DataChannel for MockChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> Result<(), EngineError> {
        self.sent.lock().push(text);
        Ok(())
    }
}

/// Records every call the SFU makes. `add_track` raises
/// `NegotiationNeeded` the way a real engine does.
pub struct MockConnection {
    sink: EventSink,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    remote_sets: AtomicUsize,
    offers: AtomicUsize,
    fail_remote: AtomicBool,
    rejected: Mutex<Vec<String>>,
    applied: Mutex<Vec<String>>,
    tracks: Mutex<Vec<TrackRef>>,
    channels: Mutex<HashMap<ChannelKind, Arc<MockChannel>>>,
    closed: AtomicBool,
}

impl MockConnection {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            remote_sets: AtomicUsize::new(0),
            offers: AtomicUsize::new(0),
            fail_remote: AtomicBool::new(false),
            rejected: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            channels: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        self.sink.key()
    }

    /// Raise an engine event as if the stack reported it
    pub fn emit(&self, event: EngineEvent) {
        self.sink.emit(event);
    }

    pub fn remote_description_sets(&self) -> usize {
        self.remote_sets.load(Ordering::SeqCst)
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn fail_next_remote_description(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    pub fn reject_candidate(&self, candidate: &str) {
        self.rejected.lock().push(candidate.to_string());
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.lock().iter().map(|t| t.id().to_string()).collect()
    }

    pub fn channel(&self, kind: ChannelKind) -> Arc<MockChannel> {
        Arc::clone(&self.channels.lock()[&kind])
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::offer(format!("mock-offer-{n}")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        match &*self.remote.lock() {
            Some(remote) if remote.sdp_type == SdpType::Offer => {
                Ok(SessionDescription::answer("mock-answer"))
            }
            _ => Err(EngineError::InvalidDescription("no remote offer".to_string())),
        }
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), EngineError> {
        *self.local.lock() = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), EngineError> {
        self.remote_sets.fetch_add(1, Ordering::SeqCst);
        if self.fail_remote.swap(false, Ordering::SeqCst) {
            return Err(EngineError::InvalidDescription("rejected by mock".to_string()));
        }
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.remote.lock().is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        if self.remote.lock().is_none()
            || candidate.is_end_of_candidates()
            || self.rejected.lock().contains(&candidate.candidate)
        {
            return Err(EngineError::InvalidCandidate(candidate.candidate));
        }
        self.applied.lock().push(candidate.candidate);
        Ok(())
    }

    async fn add_track(&self, track: TrackRef) -> Result<(), EngineError> {
        self.tracks.lock().push(track);
        self.sink.emit(EngineEvent::NegotiationNeeded);
        Ok(())
    }

    async fn create_data_channel(&self, kind: ChannelKind) -> Result<Arc<dyn DataChannel>, EngineError> {
        let channel = Arc::new(MockChannel {
            kind,
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        });
        self.channels.lock().insert(kind, Arc::clone(&channel));
        Ok(channel)
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that keeps every connection it created, newest last
#[derive(Default)]
pub struct MockFactory {
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Most recent connection created for `key`
    pub fn connection(&self, key: &ConnectionKey) -> Option<Arc<MockConnection>> {
        self.connections
            .lock()
            .iter()
            .rev()
            .find(|conn| conn.key() == key)
            .cloned()
    }

    pub fn created(&self) -> usize {
        self.connections.lock().len()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockFactory {
    async fn create(
        &self,
        _config: &RtcConfiguration,
        events: EventSink,
    ) -> Result<Arc<dyn PeerConnection>, EngineError> {
        let connection = Arc::new(MockConnection::new(events));
        self.connections.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}
