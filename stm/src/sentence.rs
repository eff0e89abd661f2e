//! Per-sentence state.
//!
//! A [`Sentence`] records one command accepted (or being accepted) by the
//! backend: its text, its document range at submission time, its execution
//! status, and its place in the acceptance tree. Ranges are kept current
//! across document edits by [`Sentence::apply_text_changes`].

use crate::protocol::{SentenceStatus, StateId};
use lsp_types::{Position, Range};
use std::time::Instant;
use text_util::{
    apply_delta_to_range, position_is_before_or_equal, range_contains, RangeDelta,
};

/// Arena handle for a sentence, assigned by the tree.
///
/// Distinct from [`StateId`]: state ids come from the backend and die with
/// cancellation, arena ids are purely client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SentenceId(pub(crate) usize);

/// An error recorded against a sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceError {
    pub message: String,
    /// Error location in document coordinates, when the backend located it
    /// within the sentence text.
    pub range: Option<Range>,
}

/// One accepted or in-progress command.
#[derive(Debug, Clone)]
pub struct Sentence {
    pub state_id: StateId,
    /// The exact command text as submitted.
    pub text: String,
    /// Document range at submission time, shifted as edits land before it.
    pub range: Range,
    pub status: SentenceStatus,
    pub error: Option<SentenceError>,
    /// When the command was submitted; used for elapsed-time reporting.
    pub started_at: Instant,
    pub parent: Option<SentenceId>,
    /// Ordered by acceptance.
    pub children: Vec<SentenceId>,
}

impl Sentence {
    pub(crate) fn new(
        state_id: StateId,
        text: String,
        range: Range,
        started_at: Instant,
        parent: Option<SentenceId>,
    ) -> Self {
        Self {
            state_id,
            text,
            range,
            status: SentenceStatus::ProcessingInput,
            error: None,
            started_at,
            parent,
            children: Vec::new(),
        }
    }

    /// The sentence lies entirely at or before `pos`.
    pub fn is_before(&self, pos: Position) -> bool {
        position_is_before_or_equal(self.range.end, pos)
    }

    /// `pos` falls within the sentence's half-open range.
    pub fn contains(&self, pos: Position) -> bool {
        range_contains(self.range, pos)
    }

    pub fn update_status(&mut self, status: SentenceStatus) {
        self.status = status;
    }

    pub fn set_error(&mut self, message: impl Into<String>, range: Option<Range>) {
        self.error = Some(SentenceError {
            message: message.into(),
            range,
        });
    }

    /// Apply a batch of edit deltas, ordered greatest start first and already
    /// filtered to those not entirely after this sentence.
    ///
    /// Edits wholly before the sentence (including those touching its start,
    /// which belong to this sentence as the successor) shift its range. An
    /// edit intersecting the interior invalidates the sentence; the caller is
    /// expected to cancel it. Returns true when invalidated.
    pub fn apply_text_changes(&mut self, deltas: &[RangeDelta]) -> bool {
        let mut invalidated = false;

        for delta in deltas {
            if position_is_before_or_equal(delta.range.end, self.range.start) {
                self.range = apply_delta_to_range(delta, self.range);
            } else if position_is_before_or_equal(self.range.end, delta.range.start) {
                // Entirely after this sentence; the reconciler drops these
                // before calling, but stay robust to stray entries.
                continue;
            } else {
                invalidated = true;
            }
        }

        invalidated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use text_util::range_delta;

    fn range(sl: u32, sc: u32, el: u32, ec: u32) -> Range {
        Range::new(Position::new(sl, sc), Position::new(el, ec))
    }

    fn sentence(r: Range) -> Sentence {
        Sentence::new(2, "intros.".to_string(), r, Instant::now(), None)
    }

    #[test]
    fn edit_before_sentence_shifts_range() {
        let mut sent = sentence(range(0, 2, 0, 4));
        let deltas = [range_delta(range(0, 0, 0, 1), "XY")];

        assert!(!sent.apply_text_changes(&deltas));
        assert_eq!(sent.range, range(0, 3, 0, 5));
    }

    #[test]
    fn edit_touching_start_attaches_without_invalidating() {
        // Insertion exactly at the sentence's start belongs to it as the
        // successor: the range shifts, nothing is invalidated.
        let mut sent = sentence(range(0, 2, 0, 4));
        let deltas = [range_delta(range(0, 2, 0, 2), "z")];

        assert!(!sent.apply_text_changes(&deltas));
        assert_eq!(sent.range, range(0, 3, 0, 5));
    }

    #[test]
    fn interior_overlap_invalidates() {
        let mut sent = sentence(range(0, 2, 0, 4));
        let deltas = [range_delta(range(0, 3, 0, 5), "")];

        assert!(sent.apply_text_changes(&deltas));
    }

    #[test]
    fn replacement_of_leading_characters_invalidates() {
        let mut sent = sentence(range(0, 0, 0, 2));
        let deltas = [range_delta(range(0, 0, 0, 1), "XY")];

        assert!(sent.apply_text_changes(&deltas));
    }

    #[test]
    fn multiple_prior_edits_accumulate() {
        let mut sent = sentence(range(0, 10, 0, 14));
        // Greatest start first, per the reconciler's ordering.
        let deltas = [
            range_delta(range(0, 6, 0, 8), ""),
            range_delta(range(0, 0, 0, 2), "XXXX"),
        ];

        assert!(!sent.apply_text_changes(&deltas));
        assert_eq!(sent.range, range(0, 10, 0, 14));
    }

    #[test]
    fn containment_is_half_open() {
        let sent = sentence(range(0, 2, 0, 4));
        assert!(sent.contains(Position::new(0, 2)));
        assert!(sent.contains(Position::new(0, 3)));
        assert!(!sent.contains(Position::new(0, 4)));
        assert!(sent.is_before(Position::new(0, 4)));
        assert!(!sent.is_before(Position::new(0, 3)));
    }
}
