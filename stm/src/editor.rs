//! The editor-facing surface.
//!
//! Two capabilities the editor adapter provides ([`CommandSource`] for
//! parsed command candidates, [`TextEdit`] batches for document changes) and
//! one the state machine provides back ([`EditorCallbacks`] for decoration
//! and message routing). Both capability sets are injected at construction;
//! there are no globals.

use crate::protocol::{LtacProfResults, MessageLevel, SentenceStatus};
use lsp_types::{Position, Range};

/// One parsed command candidate: exact text plus its document range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandToken {
    pub text: String,
    pub range: Range,
}

/// Factory for lazy sequences of command candidates.
///
/// `commands(start, end)` restarts parsing from `start`; the sequence is
/// finite and, when `end` is given, need not produce candidates past it. The
/// state machine re-invokes the factory whenever its focus jumps
/// non-contiguously, so implementations must tolerate arbitrary anchors.
pub trait CommandSource: Send + Sync {
    fn commands(
        &self,
        start: Position,
        end: Option<Position>,
    ) -> Box<dyn Iterator<Item = CommandToken> + Send + '_>;
}

/// One document change: the replaced range and its replacement text.
///
/// Ranges are in pre-edit coordinates; batches may arrive in any order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range,
    pub text: String,
}

/// Notifications the state machine pushes to the editor adapter.
///
/// Called synchronously from the state machine's task; implementations
/// should hand work off rather than block.
pub trait EditorCallbacks: Send + Sync {
    /// A sentence's execution status changed.
    fn sentence_status_update(&self, range: Range, status: SentenceStatus);

    /// A sentence was cancelled; its decorations should be dropped.
    fn clear_sentence(&self, range: Range);

    /// A sentence failed. `error_range` locates the error within the
    /// sentence when the backend reported a location; `rich` is the
    /// pretty-printer's markup rendering of the message, forwarded opaquely.
    fn error(
        &self,
        sentence_range: Range,
        error_range: Option<Range>,
        message: &str,
        rich: Option<&str>,
    );

    /// Free-form backend output. `rich` carries the markup rendering when
    /// the backend produced one.
    fn message(&self, level: MessageLevel, text: &str, rich: Option<&str>);

    /// Ltac profiling results, scoped to a sentence when known.
    fn ltac_prof_results(&self, range: Option<Range>, results: &LtacProfResults);

    /// The backend died or the session hit an unrecoverable fault.
    fn coq_died(&self, error: Option<&str>);
}
