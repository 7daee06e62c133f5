//! Remote ICE candidate handling shared by producers and consumers
//!
//! Candidates trickle in independently of the offer/answer exchange and may
//! arrive before the remote description they belong to. Those are held in a
//! FIFO queue and applied, in arrival order, once the description is set.

use crate::engine::{ConnectionKey, PeerConnection};
use crate::signaling::IceCandidate;
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct CandidateQueue {
    queued: VecDeque<IceCandidate>,
}

impl CandidateQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Discard queued candidates that belong to a rejected description.
    pub fn clear(&mut self) {
        self.queued.clear();
    }

    /// Apply the candidate now if the remote description is in place,
    /// otherwise hold it until [`CandidateQueue::drain`] runs.
    pub async fn apply_or_queue(
        &mut self,
        connection: &dyn PeerConnection,
        candidate: IceCandidate,
        key: &ConnectionKey,
    ) {
        if connection.has_remote_description().await {
            apply_candidate(connection, candidate, key).await;
        } else {
            debug!(connection = %key, queued = self.queued.len() + 1, "Caching ICE candidate");
            self.queued.push_back(candidate);
        }
    }

    /// Apply every queued candidate in arrival order. A candidate that fails
    /// does not stop the rest. Returns how many were applied successfully.
    pub async fn drain(&mut self, connection: &dyn PeerConnection, key: &ConnectionKey) -> usize {
        if self.queued.is_empty() {
            return 0;
        }

        debug!(connection = %key, count = self.queued.len(), "Processing cached ICE candidates");
        let mut applied = 0;
        while let Some(candidate) = self.queued.pop_front() {
            if apply_candidate(connection, candidate, key).await {
                applied += 1;
            }
        }
        applied
    }
}

/// Add one remote candidate, swallowing failures.
///
/// Rejected end-of-candidates markers are expected and ignored silently;
/// anything else is logged.
pub async fn apply_candidate(
    connection: &dyn PeerConnection,
    candidate: IceCandidate,
    key: &ConnectionKey,
) -> bool {
    let end_of_candidates = candidate.is_end_of_candidates();
    match connection.add_ice_candidate(candidate).await {
        Ok(()) => true,
        Err(_) if end_of_candidates => false,
        Err(e) => {
            warn!(connection = %key, error = %e, "Unable to add ICE candidate");
            false
        }
    }
}
