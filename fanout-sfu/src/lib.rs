//! Fanout SFU (Selective Forwarding Unit)
//!
//! Every peer publishes its audio/video once to the SFU through a *producer*
//! connection. For every other peer the SFU opens a *consumer* connection that
//! carries the tracks it forwards, so each peer uploads once regardless of how
//! many others are listening.
//!
//! ## Architecture
//!
//! - **`Sfu`**: client registry and the single dispatch loop; fans tracks,
//!   features and chat out to every other client
//! - **`Client`**: one peer's producer plus its consumers, keyed by the peer
//!   whose media they carry
//! - **`Producer`** / **`Consumer`**: the two negotiation roles, each with its
//!   own state machine and ICE candidate queue
//! - **`engine`**: the peer-connection contract; [`rtc::RtcEngine`] implements
//!   it on top of the `webrtc` crate
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fanout_sfu::{rtc::RtcEngine, Sfu, SfuConfig, RtcConfiguration};
//!
//! let config = SfuConfig::new("sfu-1", RtcConfiguration::from_json(&raw)?);
//! let (signaling_tx, signaling_rx) = tokio::sync::mpsc::unbounded_channel();
//! let sfu = Sfu::new(config, Arc::new(RtcEngine::new()?), signaling_tx);
//! tokio::spawn(sfu.run(inbound_rx, shutdown));
//! ```

mod client;
mod config;
mod consumer;
pub mod engine;
mod error;
mod events;
mod ice;
mod producer;
pub mod rtc;
pub mod sdp;
mod sfu;
pub mod signaling;
mod types;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use config::{IceServer, RtcConfiguration, SfuConfig};
pub use consumer::{Consumer, ConsumerState};
pub use error::{EngineError, Result, SfuError};
pub use events::SfuEvent;
pub use producer::{Producer, ProducerState};
pub use sfu::{Sfu, SfuStats};
pub use signaling::{InboundMessage, OutboundMessage, SignalingSender};
pub use types::{FeatureSet, PeerId, TrackKind};
