//! Remote candidates that arrive before the remote description

use std::collections::VecDeque;

use crate::signaling::protocol::IceCandidate;

/// FIFO of remote candidates awaiting the remote description
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate
    pub fn push(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    /// Move every candidate of `other` to the back of this buffer
    pub fn append(&mut self, other: &mut CandidateBuffer) {
        self.pending.append(&mut other.pending);
    }

    /// Take all candidates in arrival order, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    /// Drop all candidates
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Number of buffered candidates
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
