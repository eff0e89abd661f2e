//! Error types for state machine operations.

use lsp_types::Range;
use snafu::Snafu;

pub type Result<T, E = StmError> = std::result::Result<T, E>;

/// A backend command rejection, with the error span translated to document
/// coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FailValue {
    pub message: String,
    pub range: Range,
}

/// How a state machine operation can fail.
#[derive(Debug, Snafu)]
pub enum StmError {
    /// The backend rejected a command; the session has been rewound and
    /// remains usable.
    #[snafu(display("command failed: {}", value.message))]
    Fail { value: FailValue },

    /// An internal invariant was violated. The session is disposed.
    #[snafu(display("Inconsistent state: {detail}"))]
    Inconsistent { detail: String },

    /// The backend connection closed while the session was running.
    #[snafu(display("backend closed: {}", error.as_deref().unwrap_or("no error reported")))]
    BackendClosed { error: Option<String> },

    /// The session has been disposed; no further operations are accepted.
    #[snafu(display("proof session has been disposed"))]
    Disposed,

    /// A transport-level failure with no recovery payload.
    #[snafu(display("backend error: {message}"))]
    Backend { message: String },
}
