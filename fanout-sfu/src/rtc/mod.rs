//! Peer-connection engine backed by the `webrtc` crate
//!
//! - [`RtcEngine`]: builds the `webrtc` API once and creates connections
//! - [`RtcPeerConnection`]: adapts one `RTCPeerConnection` to the engine traits
//! - [`ForwardedTrack`]: re-publishes an inbound track to any number of consumers

mod connection;
mod track;

pub use connection::{RtcDataChannel, RtcPeerConnection};
pub use track::{ForwardedTrack, TrackStats, PLI_INTERVAL};

use crate::config::{IceServer, RtcConfiguration};
use crate::engine::{EventSink, PeerConnection, PeerConnectionFactory};
use crate::error::EngineError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;

impl From<&IceServer> for RTCIceServer {
    fn from(server: &IceServer) -> Self {
        Self {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

impl From<&RtcConfiguration> for RTCConfiguration {
    fn from(config: &RtcConfiguration) -> Self {
        Self {
            ice_servers: config.ice_servers.iter().map(RTCIceServer::from).collect(),
            ..Default::default()
        }
    }
}

/// Creates `webrtc` peer connections with the default codecs and interceptors
pub struct RtcEngine {
    api: API,
}

impl RtcEngine {
    pub fn new() -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

#[async_trait]
impl PeerConnectionFactory for RtcEngine {
    async fn create(
        &self,
        config: &RtcConfiguration,
        events: EventSink,
    ) -> Result<Arc<dyn PeerConnection>, EngineError> {
        let connection = self
            .api
            .new_peer_connection(RTCConfiguration::from(config))
            .await?;

        debug!(connection = %events.key(), "Peer connection created");
        Ok(Arc::new(RtcPeerConnection::new(Arc::new(connection), events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_server_conversion() {
        let config = RtcConfiguration::from_json(
            r#"[{"urls":"stun:stun.example.org"},{"urls":["turn:t.example.org"],"username":"u","credential":"c"}]"#,
        )
        .unwrap();

        let converted = RTCConfiguration::from(&config);
        assert_eq!(converted.ice_servers.len(), 2);
        assert_eq!(converted.ice_servers[0].urls, vec!["stun:stun.example.org"]);
        assert!(converted.ice_servers[0].username.is_empty());
        assert_eq!(converted.ice_servers[1].credential, "c");
    }

    #[tokio::test]
    async fn test_engine_creates_connection_with_channels() {
        use crate::engine::{ChannelKind, ConnectionKey};
        use crate::types::PeerId;
        use tokio::sync::mpsc;

        let engine = RtcEngine::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = engine
            .create(
                &RtcConfiguration::default(),
                EventSink::new(ConnectionKey::producer(PeerId::from("1")), tx),
            )
            .await
            .unwrap();

        let chat = connection.create_data_channel(ChannelKind::Chat).await.unwrap();
        assert_eq!(chat.kind(), ChannelKind::Chat);
        assert!(!chat.is_open().await);
        assert!(!connection.has_remote_description().await);

        connection.close().await.unwrap();
    }
}
