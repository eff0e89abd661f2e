//! Buffering for feedback that arrives ahead of its state id.
//!
//! The backend may push a status update for a state id before the add
//! response that introduces the id has been received. Such events are parked
//! here and replayed at the one point where new ids become known: the
//! completion of a successful add.

use crate::protocol::{SentenceStatus, StateId};

/// A parked status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedFeedback {
    pub state_id: StateId,
    pub status: SentenceStatus,
    pub worker: Option<String>,
}

/// Append-only buffer of status updates awaiting their state id.
#[derive(Debug, Default)]
pub struct FeedbackBuffer {
    entries: Vec<BufferedFeedback>,
}

impl FeedbackBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: BufferedFeedback) {
        self.entries.push(entry);
    }

    /// Take every parked entry, leaving the buffer empty.
    ///
    /// Entries whose id is still unknown after replay are pushed back by the
    /// caller; the drain itself is all-or-nothing.
    pub fn drain(&mut self) -> Vec<BufferedFeedback> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
