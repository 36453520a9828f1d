use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::link::IceCandidate;
use crate::signaling::PeerId;

/// Candidates that arrived before the session they belong to.
///
/// Bounded per peer (oldest evicted) and aged out after `retention`.
pub(crate) struct CandidateBuffer {
    capacity: usize,
    retention: Duration,
    pending: HashMap<PeerId, VecDeque<(Instant, IceCandidate)>>,
}

impl CandidateBuffer {
    pub(crate) fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            capacity,
            retention,
            pending: HashMap::new(),
        }
    }

    pub(crate) fn push(&mut self, peer: &PeerId, candidate: IceCandidate, now: Instant) {
        self.prune(now);
        if self.capacity == 0 {
            return;
        }
        let queue = self.pending.entry(peer.clone()).or_default();
        while queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back((now, candidate));
    }

    /// Remove and return the still-fresh candidates for `peer`, oldest first
    pub(crate) fn take(&mut self, peer: &PeerId, now: Instant) -> Vec<IceCandidate> {
        let retention = self.retention;
        self.pending
            .remove(peer)
            .map(|queue| {
                queue
                    .into_iter()
                    .filter(|(at, _)| now.duration_since(*at) <= retention)
                    .map(|(_, candidate)| candidate)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn discard(&mut self, peer: &PeerId) {
        self.pending.remove(peer);
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    fn prune(&mut self, now: Instant) {
        let retention = self.retention;
        self.pending.retain(|_, queue| {
            queue.retain(|(at, _)| now.duration_since(*at) <= retention);
            !queue.is_empty()
        });
    }
}
