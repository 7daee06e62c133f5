use thiserror::Error;

/// Failure reported by a peer-connection engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Unsupported track: {0}")]
    UnsupportedTrack(String),

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),
}

#[derive(Error, Debug)]
pub enum SfuError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, SfuError>;
