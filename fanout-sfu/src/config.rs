//! SFU Configuration

use crate::types::PeerId;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

/// One STUN/TURN server entry, in the shape browsers use for `iceServers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs; a single string is accepted as a one-element list
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// ICE configuration handed to every peer connection the SFU creates.
///
/// Read-only after startup; shared between connections through an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcConfiguration {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

impl RtcConfiguration {
    /// Parse the `RTC_CONFIG` JSON document.
    ///
    /// Accepts either a bare `iceServers` array or an object carrying one.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Servers(Vec<IceServer>),
            Config(RtcConfiguration),
        }

        Ok(match serde_json::from_str(raw)? {
            Raw::Servers(ice_servers) => Self { ice_servers },
            Raw::Config(config) => config,
        })
    }
}

/// SFU configuration
#[derive(Debug, Clone)]
pub struct SfuConfig {
    /// Identity this instance announces to the signaling server
    pub sfu_id: PeerId,
    /// ICE servers shared by all connections
    pub rtc_configuration: Arc<RtcConfiguration>,
}

impl SfuConfig {
    pub fn new(sfu_id: impl Into<PeerId>, rtc_configuration: RtcConfiguration) -> Self {
        Self {
            sfu_id: sfu_id.into(),
            rtc_configuration: Arc::new(rtc_configuration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_server_list() {
        let config = RtcConfiguration::from_json(
            r#"[{"urls": "stun:stun.l.google.com:19302"}]"#,
        )
        .unwrap();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert!(config.ice_servers[0].username.is_none());
    }

    #[test]
    fn test_parse_ice_servers_object() {
        let config = RtcConfiguration::from_json(
            r#"{"iceServers": [{"urls": ["turn:turn.example.org:3478"], "username": "u", "credential": "p"}]}"#,
        )
        .unwrap();
        assert_eq!(config.ice_servers[0].username.as_deref(), Some("u"));
        assert_eq!(config.ice_servers[0].credential.as_deref(), Some("p"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RtcConfiguration::from_json("not json").is_err());
        assert!(RtcConfiguration::from_json(r#"{"iceServers": 3}"#).is_err());
    }
}
