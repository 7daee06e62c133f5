//! Internal events raised by producers and fanned out by the SFU

use crate::engine::TrackRef;
use crate::types::{FeatureSet, PeerId};

#[derive(Debug, Clone)]
pub enum SfuEvent {
    /// A producer received a new inbound track
    ProducerTrackAdded { id: PeerId, track: TrackRef },
    /// A peer published its feature set over the features channel
    FeaturesShared {
        id: PeerId,
        features: FeatureSet,
        initial_connect: bool,
    },
    /// A peer wrote to its chat channel
    ChatMessage { id: PeerId, message: String },
}

impl SfuEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ProducerTrackAdded { .. } => "producer_track",
            Self::FeaturesShared { .. } => "features_shared",
            Self::ChatMessage { .. } => "chat_message",
        }
    }
}
