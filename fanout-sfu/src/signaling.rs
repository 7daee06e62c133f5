//! Signaling wire messages exchanged with the signaling server
//!
//! Inbound frames are tagged by `type`; outbound frames are wrapped in an
//! `{action, data}` envelope.

use crate::types::PeerId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// SDP type of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Trickled ICE candidate, mirroring `RTCIceCandidateInit`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    #[serde(default)]
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }

    /// End-of-candidates markers carry an empty (or single character)
    /// candidate line; failing to apply one is expected.
    #[must_use]
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.len() <= 1
    }
}

/// Body of an inbound `producer` / `consumer` message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sender: PeerId,
    #[serde(default)]
    pub receiver: Option<PeerId>,
    #[serde(default)]
    pub description: Option<SessionDescription>,
    #[serde(default)]
    pub candidate: Option<IceCandidate>,
    #[serde(default)]
    pub remote_peer_id: Option<PeerId>,
}

/// Message received from the signaling server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "producer")]
    Producer(Handshake),
    #[serde(rename = "consumer")]
    Consumer(Handshake),
    #[serde(rename = "clientDisconnect", rename_all = "camelCase")]
    ClientDisconnect { client_id: PeerId },
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Which of a peer's two connection kinds a handshake belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeRole {
    Producer,
    Consumer,
}

/// Body of an outbound `handshake` action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundHandshake {
    #[serde(rename = "type")]
    pub role: HandshakeRole,
    pub sender: PeerId,
    pub receiver: PeerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_peer_id: Option<PeerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<SessionDescription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
}

/// Message sent to the signaling server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "data", rename_all = "camelCase")]
pub enum OutboundMessage {
    Identify {
        id: PeerId,
        #[serde(rename = "type")]
        kind: String,
    },
    Handshake(OutboundHandshake),
}

impl OutboundMessage {
    /// Announcement sent once the signaling connection opens
    pub fn identify(sfu_id: &PeerId) -> Self {
        Self::Identify {
            id: sfu_id.clone(),
            kind: "sfu".to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The handshake body, if this is a handshake
    #[must_use]
    pub fn handshake(&self) -> Option<&OutboundHandshake> {
        match self {
            Self::Handshake(handshake) => Some(handshake),
            Self::Identify { .. } => None,
        }
    }
}

/// Outbound half of the signaling channel, drained by the transport task.
pub type SignalingSender = mpsc::UnboundedSender<OutboundMessage>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_producer_offer() {
        let msg = InboundMessage::from_json(
            r#"{"type":"producer","sender":1,"receiver":"sfu-1","description":{"type":"offer","sdp":"v=0"}}"#,
        )
        .unwrap();
        let InboundMessage::Producer(handshake) = msg else {
            panic!("expected producer message");
        };
        assert_eq!(handshake.sender, PeerId::from("1"));
        assert_eq!(handshake.description, Some(SessionDescription::offer("v=0")));
        assert!(handshake.candidate.is_none());
    }

    #[test]
    fn test_parse_consumer_candidate() {
        let msg = InboundMessage::from_json(
            r#"{"type":"consumer","sender":"2","remotePeerId":"1","candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#,
        )
        .unwrap();
        let InboundMessage::Consumer(handshake) = msg else {
            panic!("expected consumer message");
        };
        assert_eq!(handshake.remote_peer_id, Some(PeerId::from("1")));
        let candidate = handshake.candidate.unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
    }

    #[test]
    fn test_parse_disconnect_and_unknown() {
        let msg = InboundMessage::from_json(r#"{"type":"clientDisconnect","clientId":"7"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::ClientDisconnect {
                client_id: PeerId::from("7")
            }
        );

        let msg = InboundMessage::from_json(r#"{"type":"whatever","foo":1}"#).unwrap();
        assert_eq!(msg, InboundMessage::Unknown);
    }

    #[test]
    fn test_outbound_envelopes() {
        let identify = OutboundMessage::identify(&PeerId::from("sfu-1"));
        assert_eq!(
            serde_json::to_value(&identify).unwrap(),
            json!({"action": "identify", "data": {"id": "sfu-1", "type": "sfu"}})
        );

        let handshake = OutboundMessage::Handshake(OutboundHandshake {
            role: HandshakeRole::Consumer,
            sender: PeerId::from("sfu-1"),
            receiver: PeerId::from("2"),
            remote_peer_id: Some(PeerId::from("1")),
            description: Some(SessionDescription::offer("v=0")),
            candidate: None,
        });
        assert_eq!(
            serde_json::to_value(&handshake).unwrap(),
            json!({
                "action": "handshake",
                "data": {
                    "type": "consumer",
                    "sender": "sfu-1",
                    "receiver": "2",
                    "remotePeerId": "1",
                    "description": {"type": "offer", "sdp": "v=0"}
                }
            })
        );
    }

    #[test]
    fn test_end_of_candidates_marker() {
        assert!(IceCandidate::new("").is_end_of_candidates());
        assert!(IceCandidate::new(" ").is_end_of_candidates());
        assert!(!IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host").is_end_of_candidates());
    }
}
